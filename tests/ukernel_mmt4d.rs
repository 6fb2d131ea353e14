//! mmt4d integration tests: correctness against a naive reference, the
//! documented early-exit policy, and registry equivalence.

use mlc_exec::ukernel::{mmt4d, Mmt4dKind, Mmt4dParams, TileRegistry, FLAG_ACCUMULATE};

fn as_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn from_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks(4)
        .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
        .collect()
}

/// Naive reference over the same 4-D layouts.
#[allow(clippy::too_many_arguments)]
fn reference_f32(
    m: usize,
    n: usize,
    k: usize,
    m0: usize,
    n0: usize,
    k0: usize,
    lhs: &[f32],
    rhs: &[f32],
    out: &mut [f32],
    accumulate: bool,
) {
    let lhs_stride = k * m0 * k0;
    let rhs_stride = k * n0 * k0;
    let out_stride = n * m0 * n0;
    for i in 0..m {
        for j in 0..n {
            for a in 0..m0 {
                for b in 0..n0 {
                    let idx = i * out_stride + j * m0 * n0 + a * n0 + b;
                    let mut sum = if accumulate { out[idx] } else { 0.0 };
                    for kk in 0..k {
                        for l in 0..k0 {
                            sum += lhs[i * lhs_stride + kk * m0 * k0 + a * k0 + l]
                                * rhs[j * rhs_stride + kk * n0 * k0 + b * k0 + l];
                        }
                    }
                    out[idx] = sum;
                }
            }
        }
    }
}

fn sequence(len: usize) -> Vec<f32> {
    (0..len).map(|i| (i % 13) as f32 - 6.0).collect()
}

#[allow(clippy::too_many_arguments)]
fn run_f32(
    m: usize,
    n: usize,
    k: usize,
    m0: usize,
    n0: usize,
    k0: usize,
    accumulate: bool,
    registry: &TileRegistry,
) -> (Vec<f32>, Vec<f32>) {
    let lhs = sequence(m * k * m0 * k0);
    let rhs: Vec<f32> = sequence(n * k * n0 * k0).iter().map(|v| v * 0.5).collect();
    let initial = sequence(m * n * m0 * n0);

    let mut expected = initial.clone();
    reference_f32(m, n, k, m0, n0, k0, &lhs, &rhs, &mut expected, accumulate);

    let mut out_bytes = as_bytes(&initial);
    let params = Mmt4dParams {
        kind: Mmt4dKind::F32F32F32,
        flags: if accumulate { FLAG_ACCUMULATE } else { 0 },
        m,
        n,
        k,
        m0,
        n0,
        k0,
        lhs: &as_bytes(&lhs),
        lhs_stride: k * m0 * k0,
        rhs: &as_bytes(&rhs),
        rhs_stride: k * n0 * k0,
        out: &mut out_bytes,
        out_stride: n * m0 * n0,
    };
    mmt4d(params, registry).unwrap();
    (from_bytes(&out_bytes), expected)
}

#[test]
fn f32_matches_reference_generic_tiles() {
    for (m, n, k, m0, n0, k0) in [
        (1, 1, 1, 1, 1, 1),
        (2, 3, 4, 2, 2, 1),
        (3, 2, 5, 3, 5, 2),
        (4, 4, 1, 8, 8, 1),
    ] {
        let (got, expected) = run_f32(m, n, k, m0, n0, k0, false, TileRegistry::generic());
        assert_eq!(got, expected, "shape {m}x{n}x{k} tile {m0}x{n0}x{k0}");
    }
}

#[test]
fn f32_accumulate_adds_to_existing_output() {
    let (got, expected) = run_f32(2, 2, 3, 4, 4, 1, true, TileRegistry::host());
    assert_eq!(got, expected);
}

#[test]
fn host_registry_matches_generic_registry() {
    // 8x8x1 f32 selects the architecture tile routine where one exists.
    let (host, _) = run_f32(3, 3, 7, 8, 8, 1, false, TileRegistry::host());
    let (generic, _) = run_f32(3, 3, 7, 8, 8, 1, false, TileRegistry::generic());
    assert_eq!(host, generic);
}

#[test]
fn parallel_rows_match_reference() {
    // Enough rows to cross the rayon threshold.
    let (got, expected) = run_f32(40, 3, 5, 2, 4, 1, false, TileRegistry::host());
    assert_eq!(got, expected);
}

#[test]
fn empty_m_or_n_writes_nothing() {
    for (m, n) in [(0, 4), (4, 0), (0, 0)] {
        let sentinel = vec![0xA5u8; 256];
        let mut out = sentinel.clone();
        let params = Mmt4dParams {
            kind: Mmt4dKind::F32F32F32,
            flags: 0,
            m,
            n,
            k: 3,
            m0: 2,
            n0: 2,
            k0: 1,
            lhs: &[],
            lhs_stride: 6,
            rhs: &[],
            rhs_stride: 6,
            out: &mut out,
            out_stride: n * 4,
        };
        mmt4d(params, TileRegistry::host()).unwrap();
        assert_eq!(out, sentinel, "m={m} n={n}");
    }
}

#[test]
fn k_zero_zero_fills_strided_region() {
    // M=2 rows of N*M0*N0=8 f32 content with a 4-element gap between rows.
    let m = 2;
    let content = 8;
    let stride = 12;
    let initial: Vec<f32> = (0..stride * (m - 1) + content).map(|i| i as f32 + 1.0).collect();
    let mut out = as_bytes(&initial);
    let params = Mmt4dParams {
        kind: Mmt4dKind::F32F32F32,
        flags: 0,
        m,
        n: 2,
        k: 0,
        m0: 2,
        n0: 2,
        k0: 1,
        lhs: &[],
        lhs_stride: 0,
        rhs: &[],
        rhs_stride: 0,
        out: &mut out,
        out_stride: stride,
    };
    mmt4d(params, TileRegistry::host()).unwrap();
    let got = from_bytes(&out);
    for row in 0..m {
        for i in 0..content {
            assert_eq!(got[row * stride + i], 0.0, "row {row} elem {i}");
        }
    }
    // The inter-row gap is not part of the output region and stays intact.
    for i in content..stride {
        assert_eq!(got[i], initial[i], "gap elem {i}");
    }
}

#[test]
fn k_zero_with_accumulate_leaves_output_untouched() {
    // The concrete scenario: M=2, N=2, K=0, flags=ACCUMULATE.
    let initial: Vec<f32> = (0..16).map(|i| i as f32 * 3.25).collect();
    let mut out = as_bytes(&initial);
    let params = Mmt4dParams {
        kind: Mmt4dKind::F32F32F32,
        flags: FLAG_ACCUMULATE,
        m: 2,
        n: 2,
        k: 0,
        m0: 2,
        n0: 2,
        k0: 1,
        lhs: &[],
        lhs_stride: 0,
        rhs: &[],
        rhs_stride: 0,
        out: &mut out,
        out_stride: 8,
    };
    mmt4d(params, TileRegistry::host()).unwrap();
    assert_eq!(from_bytes(&out), initial);
}

#[test]
fn i8i8i32_matches_reference() {
    let (m, n, k, m0, n0, k0) = (2, 2, 3, 2, 4, 1);
    let lhs: Vec<i8> = (0..m * k * m0 * k0).map(|i| (i as i8).wrapping_sub(5)).collect();
    let rhs: Vec<i8> = (0..n * k * n0 * k0).map(|i| (i as i8).wrapping_mul(3)).collect();
    let mut expected = vec![0i32; m * n * m0 * n0];
    for i in 0..m {
        for j in 0..n {
            for a in 0..m0 {
                for b in 0..n0 {
                    let mut sum = 0i32;
                    for kk in 0..k {
                        sum += lhs[i * k * m0 + kk * m0 + a] as i32
                            * rhs[j * k * n0 + kk * n0 + b] as i32;
                    }
                    expected[i * n * m0 * n0 + j * m0 * n0 + a * n0 + b] = sum;
                }
            }
        }
    }

    let lhs_bytes: Vec<u8> = lhs.iter().map(|v| *v as u8).collect();
    let rhs_bytes: Vec<u8> = rhs.iter().map(|v| *v as u8).collect();
    let mut out = vec![0u8; m * n * m0 * n0 * 4];
    let params = Mmt4dParams {
        kind: Mmt4dKind::I8I8I32,
        flags: 0,
        m,
        n,
        k,
        m0,
        n0,
        k0,
        lhs: &lhs_bytes,
        lhs_stride: k * m0 * k0,
        rhs: &rhs_bytes,
        rhs_stride: k * n0 * k0,
        out: &mut out,
        out_stride: n * m0 * n0,
    };
    mmt4d(params, TileRegistry::host()).unwrap();
    let got: Vec<i32> = out
        .chunks(4)
        .map(|c| i32::from_le_bytes(c.try_into().unwrap()))
        .collect();
    assert_eq!(got, expected);
}

#[test]
fn f16_inputs_accumulate_in_f32() {
    use half::f16;
    // 1x1 tiles, M=N=1, K=2: out = 1*2 + 3*4 = 14.
    let lhs: Vec<u8> = [f16::from_f32(1.0), f16::from_f32(3.0)]
        .iter()
        .flat_map(|v| v.to_bits().to_le_bytes())
        .collect();
    let rhs: Vec<u8> = [f16::from_f32(2.0), f16::from_f32(4.0)]
        .iter()
        .flat_map(|v| v.to_bits().to_le_bytes())
        .collect();
    let mut out = vec![0u8; 4];
    let params = Mmt4dParams {
        kind: Mmt4dKind::F16F16F32,
        flags: 0,
        m: 1,
        n: 1,
        k: 2,
        m0: 1,
        n0: 1,
        k0: 1,
        lhs: &lhs,
        lhs_stride: 2,
        rhs: &rhs,
        rhs_stride: 2,
        out: &mut out,
        out_stride: 1,
    };
    mmt4d(params, TileRegistry::host()).unwrap();
    assert_eq!(f32::from_le_bytes(out[0..4].try_into().unwrap()), 14.0);
}
