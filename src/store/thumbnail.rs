use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;

const THUMB_WIDTH: u32 = 320;
const THUMB_HEIGHT: u32 = 180;

/// Shrink a data-URL image into a small JPEG data URL for save listings.
pub fn make_thumbnail(image_url: &str) -> Result<String> {
    let b64 = match image_url.split_once(',') {
        Some((header, body)) if header.starts_with("data:") => {
            if !header.ends_with(";base64") {
                bail!("only base64 data URLs are supported");
            }
            body
        }
        Some(_) => bail!("not a data URL"),
        None => image_url,
    };

    let bytes = STANDARD.decode(b64.trim()).context("decoding image base64")?;
    let img = image::load_from_memory(&bytes).context("decoding image")?;
    let thumb = DynamicImage::ImageRgb8(img.thumbnail(THUMB_WIDTH, THUMB_HEIGHT).to_rgb8());

    let mut out = Cursor::new(Vec::new());
    thumb
        .write_to(&mut out, ImageFormat::Jpeg)
        .context("encoding thumbnail")?;

    Ok(format!("data:image/jpeg;base64,{}", STANDARD.encode(out.into_inner())))
}

/// Best effort: a failed thumbnail never fails a save.
pub fn thumbnail_or_none(image_url: Option<&str>) -> Option<String> {
    let url = image_url?;
    match make_thumbnail(url) {
        Ok(thumb) => Some(thumb),
        Err(e) => {
            log::warn!("failed to create thumbnail: {e:#}");
            None
        }
    }
}
