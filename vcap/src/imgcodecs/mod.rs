use crate::core::mat::Mat;
use anyhow::{anyhow, Context, Result};
use std::path::Path;

/// 读取图像文件，统一转换为 BGR
pub fn imread<P: AsRef<Path>>(path: P) -> Result<Mat> {
    let path = path.as_ref();
    let rgb = image::open(path)
        .with_context(|| format!("Failed to open image {}", path.display()))?
        .to_rgb8();

    let mut mat = Mat::new(rgb.height() as i32, rgb.width() as i32, 3);
    for (dst, pixel) in mat.data.chunks_exact_mut(3).zip(rgb.pixels()) {
        let [r, g, b] = pixel.0;
        dst.copy_from_slice(&[b, g, r]);
    }
    Ok(mat)
}

/// 保存 BGR 图像，格式由扩展名决定
pub fn imwrite<P: AsRef<Path>>(path: P, mat: &Mat) -> Result<()> {
    if mat.channels != 3 {
        return Err(anyhow!(
            "Only 3-channel (BGR) images can be saved, got {} channels",
            mat.channels
        ));
    }
    if mat.is_empty() {
        return Err(anyhow!("Refusing to save an empty image"));
    }

    // image crate 需要紧凑的 RGB
    let mut rgb = Vec::with_capacity(mat.rows as usize * mat.cols as usize * 3);
    for r in 0..mat.rows {
        for bgr in mat.row_bytes(r).chunks_exact(3) {
            rgb.extend_from_slice(&[bgr[2], bgr[1], bgr[0]]);
        }
    }

    let path = path.as_ref();
    image::save_buffer(
        path,
        &rgb,
        mat.cols as u32,
        mat.rows as u32,
        image::ColorType::Rgb8,
    )
    .with_context(|| format!("Failed to save image {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn png_keeps_channel_order() {
        let dir = std::env::temp_dir().join(format!("vcap-imgcodecs-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bgr.png");

        let mut mat = Mat::new(1, 2, 3);
        mat.data.copy_from_slice(&[255, 0, 0, 0, 0, 255]); // 蓝, 红
        imwrite(&path, &mat).unwrap();

        let back = imread(&path).unwrap();
        assert_eq!(back, mat);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn grayscale_is_rejected() {
        let mat = Mat::new(2, 2, 1);
        assert!(imwrite("/tmp/never-written.png", &mat).is_err());
    }
}
