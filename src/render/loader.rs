//! Turns an image file into a [`Bitmap`] sized for the current surface:
//! decode, EXIF orientation, aspect-preserving fit, brightness.
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use image::{ImageError, RgbaImage, imageops};
use tracing::debug;

use crate::config::Dimensions;
use crate::error::Error;
use crate::source::{Bitmap, RenderRequest};

pub fn load_bitmap(path: &Path, request: &RenderRequest) -> Result<Bitmap, Error> {
    let img = decode_rgba8_apply_exif(path)?;
    let (w, h) = fit_within(img.dimensions(), request.size);
    let mut img = if (w, h) == img.dimensions() {
        img
    } else {
        imageops::resize(&img, w, h, imageops::FilterType::Triangle)
    };
    apply_brightness(&mut img, request.brightness);
    Ok(Bitmap {
        source: path.to_path_buf(),
        width: w,
        height: h,
        pixels: img.into_raw(),
    })
}

fn decode_rgba8_apply_exif(path: &Path) -> Result<RgbaImage, Error> {
    let decoded = image::ImageReader::open(path)
        .map_err(|e| decode_error(path, e.to_string()))?
        .with_guessed_format()
        .map_err(|e| decode_error(path, e.to_string()))?
        .decode()
        .map_err(|e| match e {
            ImageError::Unsupported(_) => Error::UnsupportedFormat {
                path: path.to_path_buf(),
            },
            other => decode_error(path, other.to_string()),
        })?;

    let img = decoded.to_rgba8();
    let orientation = read_orientation(path).unwrap_or(1);
    Ok(match orientation {
        2 => imageops::flip_horizontal(&img),
        3 => imageops::rotate180(&img),
        4 => imageops::flip_vertical(&img),
        5 => imageops::flip_horizontal(&imageops::rotate90(&img)),
        6 => imageops::rotate90(&img),
        7 => imageops::flip_horizontal(&imageops::rotate270(&img)),
        8 => imageops::rotate270(&img),
        _ => img,
    })
}

fn decode_error(path: &Path, reason: String) -> Error {
    Error::Decode {
        path: path.to_path_buf(),
        reason,
    }
}

fn read_orientation(path: &Path) -> Option<u16> {
    let file = File::open(path).ok()?;
    let mut buf = BufReader::new(file);
    let exif = exif::Reader::new().read_from_container(&mut buf).ok()?;
    let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    let o = field.value.get_uint(0)? as u16;
    debug!("exif orientation {} for {}", o, path.display());
    Some(o)
}

/// Largest size with the source aspect ratio that fits inside `bounds`.
pub fn fit_within((w, h): (u32, u32), bounds: Dimensions) -> (u32, u32) {
    if w == 0 || h == 0 {
        return (w, h);
    }
    let scale = f64::min(
        f64::from(bounds.width) / f64::from(w),
        f64::from(bounds.height) / f64::from(h),
    );
    let fit = |v: u32| ((f64::from(v) * scale).round() as u32).max(1);
    (fit(w).min(bounds.width), fit(h).min(bounds.height))
}

fn apply_brightness(img: &mut RgbaImage, factor: f32) {
    if (factor - 1.0).abs() < f32::EPSILON {
        return;
    }
    for px in img.pixels_mut() {
        for c in &mut px.0[..3] {
            *c = (f32::from(*c) * factor).round().clamp(0.0, 255.0) as u8;
        }
    }
}
