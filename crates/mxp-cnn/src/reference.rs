//! Brute-force float reference for convolution checks
//!
//! Works on the unpadded input and tests every tap against the border, so
//! it shares no indexing with the engine it is used to check.

use crate::conv::ConvParams;
use crate::error::Result;

/// Float convolution of an unpadded input with implicit zero padding
///
/// # Errors
///
/// Returns `InvalidConfig` if the kernel does not fit the padded input.
#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
pub fn reference_conv(
    p: &ConvParams,
    input: &[f32],
    kernel: &[f32],
    bias: &[f32],
) -> Result<Vec<f32>> {
    let out = p.output_geometry()?;
    let (h, w) = (p.map_height as isize, p.map_width as isize);
    let k = p.kernel_size;
    let mut output = vec![0.0f32; out.len()];

    for o in 0..out.maps {
        for r in 0..out.height {
            for c in 0..out.width {
                let mut sum = f64::from(bias[o]);
                for i in 0..p.in_maps {
                    for kr in 0..k {
                        for kc in 0..k {
                            let y = (r * p.stride + kr) as isize - p.pad as isize;
                            let x = (c * p.stride + kc) as isize - p.pad as isize;
                            if y < 0 || y >= h || x < 0 || x >= w {
                                continue;
                            }
                            let v = input[i * p.map_height * p.map_width
                                + y as usize * p.map_width
                                + x as usize];
                            let wgt = kernel[((o * p.in_maps + i) * k + kr) * k + kc];
                            sum += f64::from(v) * f64::from(wgt);
                        }
                    }
                }
                #[allow(clippy::cast_possible_truncation)]
                let value = sum as f32;
                output[(o * out.height + r) * out.width + c] = value;
            }
        }
    }
    Ok(output)
}

/// Largest absolute element-wise difference
pub fn max_abs_diff(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f32::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::FracBits;

    #[test]
    fn padding_is_implicit() {
        let p = ConvParams {
            in_maps: 1,
            out_maps: 1,
            map_height: 1,
            map_width: 1,
            kernel_size: 3,
            pad: 1,
            stride: 1,
            map_frac_bits: FracBits::default(),
            kernel_frac_bits: FracBits::default(),
        };
        let out = reference_conv(&p, &[2.0], &[1.0; 9], &[0.5]).unwrap();
        assert_eq!(out, vec![2.5]);
    }

    #[test]
    fn diff_of_equal_slices_is_zero() {
        assert_eq!(max_abs_diff(&[1.0, 2.0], &[1.0, 2.0]), 0.0);
        assert_eq!(max_abs_diff(&[1.0, 2.0], &[1.5, 1.0]), 1.0);
    }
}
