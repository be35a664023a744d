//! Scalar six-loop convolution, the reference strategy
//!
//! Inputs are already zero-padded; `out[o, r, c]` reads the window starting
//! at `(r * stride, c * stride)` of the padded plane.

use super::ConvParams;
use crate::codec::{round_shift, saturate};
use crate::shapes::MapGeometry;

/// Float convolution over a padded input
pub(crate) fn conv_float(
    p: &ConvParams,
    out: MapGeometry,
    input: &[f32],
    kernel: &[f32],
    bias: &[f32],
    output: &mut [f32],
) {
    let padded = p.padded_geometry();
    let (ph, pw) = (padded.height, padded.width);
    let k = p.kernel_size;

    for o in 0..out.maps {
        for r in 0..out.height {
            for c in 0..out.width {
                let mut sum = 0.0f32;
                for i in 0..p.in_maps {
                    for kr in 0..k {
                        for kc in 0..k {
                            let in_idx =
                                i * ph * pw + (r * p.stride + kr) * pw + c * p.stride + kc;
                            let k_idx = ((o * p.in_maps + i) * k + kr) * k + kc;
                            sum += input[in_idx] * kernel[k_idx];
                        }
                    }
                }
                output[o * out.plane_len() + r * out.width + c] = sum + bias[o];
            }
        }
    }
}

/// Fixed-point convolution over a padded input
///
/// Products are summed in `i64`, saturating at its range, then shifted
/// down by the kernel's fractional bits so the result keeps the map's
/// format.
pub(crate) fn conv_fixed(
    p: &ConvParams,
    out: MapGeometry,
    input: &[i32],
    kernel: &[i32],
    bias: &[i32],
    output: &mut [i32],
) {
    let padded = p.padded_geometry();
    let (ph, pw) = (padded.height, padded.width);
    let k = p.kernel_size;
    let shift = p.kernel_frac_bits.get();

    for o in 0..out.maps {
        for r in 0..out.height {
            for c in 0..out.width {
                let mut acc = 0i64;
                for i in 0..p.in_maps {
                    for kr in 0..k {
                        for kc in 0..k {
                            let in_idx =
                                i * ph * pw + (r * p.stride + kr) * pw + c * p.stride + kc;
                            let k_idx = ((o * p.in_maps + i) * k + kr) * k + kc;
                            let prod = i64::from(input[in_idx]) * i64::from(kernel[k_idx]);
                            acc = acc.saturating_add(prod);
                        }
                    }
                }
                output[o * out.plane_len() + r * out.width + c] =
                    finish_fixed(acc, shift, bias[o]);
            }
        }
    }
}

/// Shift an exact accumulator into map format and add the bias
pub(crate) fn finish_fixed(acc: i64, kernel_shift: u8, bias: i32) -> i32 {
    saturate(round_shift(acc, kernel_shift).saturating_add(i64::from(bias)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::FracBits;

    fn params(pad: usize, stride: usize) -> ConvParams {
        ConvParams {
            in_maps: 1,
            out_maps: 1,
            map_height: 3,
            map_width: 3,
            kernel_size: 2,
            pad,
            stride,
            map_frac_bits: FracBits::new(4).unwrap(),
            kernel_frac_bits: FracBits::new(2).unwrap(),
        }
    }

    #[test]
    fn float_box_filter() {
        let p = params(0, 1);
        let input: Vec<f32> = (1..=9).map(|v| v as f32).collect();
        let mut out = vec![0.0; 4];
        conv_float(&p, MapGeometry::new(1, 2, 2), &input, &[1.0; 4], &[0.5], &mut out);
        assert_eq!(out, vec![12.5, 16.5, 24.5, 28.5]);
    }

    #[test]
    fn fixed_matches_float_on_exact_values() {
        let p = params(0, 1);
        // Q4 maps, Q2 kernel: 1.0 == 16, 0.25 == 1
        let input: Vec<i32> = (1..=9).map(|v| v * 16).collect();
        let mut out = vec![0; 4];
        conv_fixed(&p, MapGeometry::new(1, 2, 2), &input, &[4, 4, 4, 4], &[8], &mut out);
        assert_eq!(out, vec![12 * 16 + 8, 16 * 16 + 8, 24 * 16 + 8, 28 * 16 + 8]);
    }

    #[test]
    fn stride_skips_windows() {
        let p = params(0, 2);
        let input: Vec<f32> = (1..=9).map(|v| v as f32).collect();
        let mut out = vec![0.0; 1];
        conv_float(&p, MapGeometry::new(1, 1, 1), &input, &[1.0, 0.0, 0.0, 0.0], &[0.0], &mut out);
        assert_eq!(out, vec![1.0]);
    }

    #[test]
    fn finish_rounds_and_saturates() {
        assert_eq!(finish_fixed(6, 2, 0), 2);
        assert_eq!(finish_fixed(-6, 2, 0), -2);
        assert_eq!(finish_fixed(i64::MAX / 2, 0, 0), i32::MAX);
    }

    #[test]
    fn finish_saturates_at_accumulator_limits() {
        assert_eq!(finish_fixed(i64::MAX, 0, 5), i32::MAX);
        assert_eq!(finish_fixed(i64::MAX, 30, i32::MAX), i32::MAX);
        assert_eq!(finish_fixed(i64::MIN, 0, -5), i32::MIN);
        assert_eq!(finish_fixed(i64::MIN, 30, i32::MIN), i32::MIN);
    }

    #[test]
    fn fixed_accumulator_saturates_instead_of_wrapping() {
        // Q30 maps and kernel: 1.5 is 1.5 * 2^30, so four products pass i64::MAX.
        let q30 = FracBits::new(30).unwrap();
        let p = ConvParams {
            in_maps: 1,
            out_maps: 1,
            map_height: 3,
            map_width: 3,
            kernel_size: 3,
            pad: 0,
            stride: 1,
            map_frac_bits: q30,
            kernel_frac_bits: q30,
        };
        let g = MapGeometry::new(1, 1, 1);
        let x = 3 << 29;
        let mut out = [0; 1];
        conv_fixed(&p, g, &[x; 9], &[x; 9], &[0], &mut out);
        assert_eq!(out[0], i32::MAX);

        conv_fixed(&p, g, &[-x; 9], &[x; 9], &[0], &mut out);
        assert_eq!(out[0], i32::MIN);
    }
}
