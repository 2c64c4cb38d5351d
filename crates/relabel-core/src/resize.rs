use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};

use crate::media::ImageFile;
use crate::ProgressCallback;

/// Default scale factor applied to both dimensions.
pub const DEFAULT_SCALE: f64 = 0.25;

/// Name of the output subdirectory created inside the source directory.
pub const RESIZED_DIR: &str = "resized";

/// Scaled dimensions, floored. May be zero for very small images.
pub fn scaled_dimensions(width: u32, height: u32, scale: f64) -> (u32, u32) {
    let w = (width as f64 * scale).floor() as u32;
    let h = (height as f64 * scale).floor() as u32;
    (w, h)
}

/// Decode `src`, downscale it with Lanczos3 and save it to `dst`.
/// The output format follows the extension of `dst`.
pub fn resize_image(src: &Path, dst: &Path, scale: f64) -> anyhow::Result<(u32, u32)> {
    let img = ImageReader::open(src)
        .with_context(|| format!("Cannot open {}", src.display()))?
        .with_guessed_format()?
        .decode()
        .with_context(|| format!("Failed to decode {}", src.display()))?;

    let (w, h) = scaled_dimensions(img.width(), img.height(), scale);
    if w == 0 || h == 0 {
        anyhow::bail!(
            "{} is too small to scale by {}: {}x{} would become {}x{}",
            src.display(),
            scale,
            img.width(),
            img.height(),
            w,
            h
        );
    }
    let mut resized = img.resize_exact(w, h, FilterType::Lanczos3);

    // JPEG has no alpha channel
    if ImageFormat::from_path(dst).ok() == Some(ImageFormat::Jpeg) && resized.color().has_alpha() {
        resized = DynamicImage::ImageRgb8(resized.to_rgb8());
    }

    resized
        .save(dst)
        .with_context(|| format!("Failed to save {}", dst.display()))?;
    Ok((w, h))
}

/// Resize every source image into `resized_dir`, keeping filenames.
/// The first decode or encode failure aborts the whole pass.
pub fn resize_all(
    images: &[ImageFile],
    resized_dir: &Path,
    scale: f64,
    progress: &ProgressCallback,
) -> anyhow::Result<Vec<PathBuf>> {
    fs::create_dir_all(resized_dir)
        .with_context(|| format!("Cannot create {}", resized_dir.display()))?;

    let total = images.len() as u64;
    let mut outputs = Vec::with_capacity(images.len());
    for (i, image) in images.iter().enumerate() {
        let dst = resized_dir.join(&image.filename);
        let (w, h) = resize_image(&image.path, &dst, scale)?;
        tracing::debug!(src = %image.path.display(), width = w, height = h, "resized");
        progress(
            "resize",
            i as u64,
            total,
            &format!("Resized and saved {} to {}", image.path.display(), dst.display()),
        );
        outputs.push(dst);
    }
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgb, RgbImage, Rgba, RgbaImage};
    use tempfile::tempdir;

    fn noop(_: &str, _: u64, _: u64, _: &str) {}

    #[test]
    fn test_scaled_dimensions_floor() {
        assert_eq!(scaled_dimensions(400, 300, 0.25), (100, 75));
        assert_eq!(scaled_dimensions(401, 303, 0.25), (100, 75));
        assert_eq!(scaled_dimensions(2, 7, 0.25), (0, 1));
        assert_eq!(scaled_dimensions(100, 80, 0.5), (50, 40));
    }

    #[test]
    fn test_resize_all_supported_formats() {
        let dir = tempdir().unwrap();
        let src_dir = dir.path();

        let rgb = RgbImage::from_pixel(41, 22, Rgb([200, 10, 10]));
        let rgba = RgbaImage::from_pixel(41, 22, Rgba([10, 200, 10, 255]));
        rgb.save(src_dir.join("a.png")).unwrap();
        rgb.save(src_dir.join("b.jpg")).unwrap();
        rgb.save(src_dir.join("c.jpeg")).unwrap();
        rgba.save(src_dir.join("d.webp")).unwrap();
        rgba.save(src_dir.join("e.gif")).unwrap();

        let images = crate::scan::scan_dir(src_dir).unwrap();
        assert_eq!(images.len(), 5);

        let out_dir = src_dir.join(RESIZED_DIR);
        let outputs = resize_all(&images, &out_dir, DEFAULT_SCALE, &noop).unwrap();
        assert_eq!(outputs.len(), 5);

        for (src, out) in images.iter().zip(&outputs) {
            assert_eq!(out.file_name().unwrap().to_string_lossy(), src.filename);
            let decoded = image::open(out).unwrap();
            assert_eq!(decoded.dimensions(), (10, 5));
        }
        // originals untouched
        assert_eq!(image::open(src_dir.join("a.png")).unwrap().dimensions(), (41, 22));
    }

    #[test]
    fn test_resize_too_small_aborts() {
        let dir = tempdir().unwrap();
        RgbImage::from_pixel(3, 40, Rgb([1, 1, 1]))
            .save(dir.path().join("sliver.png"))
            .unwrap();
        let images = crate::scan::scan_dir(dir.path()).unwrap();
        let err = resize_all(&images, &dir.path().join(RESIZED_DIR), DEFAULT_SCALE, &noop)
            .unwrap_err();
        assert!(err.to_string().contains("too small"));
        assert!(!dir.path().join(RESIZED_DIR).join("sliver.png").exists());
    }

    #[test]
    fn test_resize_undecodable_aborts() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("broken.png"), b"not an image").unwrap();
        let images = crate::scan::scan_dir(dir.path()).unwrap();
        let result = resize_all(&images, &dir.path().join(RESIZED_DIR), DEFAULT_SCALE, &noop);
        assert!(result.is_err());
    }
}
