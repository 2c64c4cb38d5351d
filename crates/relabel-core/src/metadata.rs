//! Embedding a description and tags into image files, and reading them back.
//!
//! PNG gets `tEXt`/`iTXt` chunks. JPEG gets two EXIF IFD0 entries, the
//! Windows XPComment (0x9C9C) and XPKeywords (0x9C9E) slots, holding UTF-8
//! bytes. Other formats are left alone.

use std::fs;
use std::io::Cursor;
use std::path::Path;

use exif::experimental::Writer;
use exif::{Context, Field, In, Tag, Value};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, ImageReader};
use img_parts::jpeg::Jpeg;
use img_parts::png::{Png, PngChunk};
use img_parts::{Bytes, ImageEXIF};

pub const DESCRIPTION_KEY: &str = "Description";
pub const TAGS_KEY: &str = "Tags";

/// Quality used when a JPEG is rewritten.
pub const JPEG_QUALITY: u8 = 95;

const XP_COMMENT: Tag = Tag(Context::Tiff, 0x9c9c);
const XP_KEYWORDS: Tag = Tag(Context::Tiff, 0x9c9e);

const TEXT_CHUNK: [u8; 4] = *b"tEXt";
const ITXT_CHUNK: [u8; 4] = *b"iTXt";
const ZTXT_CHUNK: [u8; 4] = *b"zTXt";
const IEND_CHUNK: [u8; 4] = *b"IEND";

/// Tags that describe file layout; the EXIF writer generates or rejects them.
const LAYOUT_TAGS: &[Tag] = &[
    Tag::ExifIFDPointer,
    Tag::GPSInfoIFDPointer,
    Tag::InteropIFDPointer,
    Tag::StripOffsets,
    Tag::StripByteCounts,
    Tag(Context::Tiff, 0x144), // TileOffsets
    Tag(Context::Tiff, 0x145), // TileByteCounts
    Tag::JPEGInterchangeFormat,
    Tag::JPEGInterchangeFormatLength,
];

/// What happened to a file's metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Embedded {
    Png,
    Jpeg,
    /// Decoded format has no supported metadata channel
    Unsupported(Option<ImageFormat>),
}

/// Detect the format from the file header.
pub fn detect_format(path: &Path) -> Result<Option<ImageFormat>, MetadataError> {
    let reader = ImageReader::open(path)?.with_guessed_format()?;
    Ok(reader.format())
}

/// Write the description and comma-joined tags into the file at `path`.
pub fn embed(path: &Path, description: &str, tags: &[String]) -> Result<Embedded, MetadataError> {
    let joined = tags.join(", ");
    match detect_format(path)? {
        Some(ImageFormat::Png) => {
            let data = fs::read(path)?;
            let out = embed_png(data, description, &joined)?;
            fs::write(path, out)?;
            Ok(Embedded::Png)
        }
        Some(ImageFormat::Jpeg) => {
            let data = fs::read(path)?;
            let out = embed_jpeg(&data, description, &joined)?;
            fs::write(path, out)?;
            Ok(Embedded::Jpeg)
        }
        other => Ok(Embedded::Unsupported(other)),
    }
}

/// Read back whatever text metadata the file carries.
///
/// PNG: every text chunk. JPEG: the description and tags slots, if present.
/// Other formats yield an empty list.
pub fn read_back(path: &Path) -> Result<Vec<(String, String)>, MetadataError> {
    match detect_format(path)? {
        Some(ImageFormat::Png) => {
            let png = Png::from_bytes(Bytes::from(fs::read(path)?))?;
            Ok(png_text_entries(&png))
        }
        Some(ImageFormat::Jpeg) => {
            let jpeg = Jpeg::from_bytes(Bytes::from(fs::read(path)?))?;
            Ok(jpeg_entries(&jpeg))
        }
        _ => Ok(Vec::new()),
    }
}

fn embed_png(data: Vec<u8>, description: &str, tags: &str) -> Result<Bytes, MetadataError> {
    let mut png = Png::from_bytes(Bytes::from(data))?;

    let chunks = png.chunks_mut();
    chunks.retain(|c| {
        !matches!(text_keyword(c), Some(k) if k == DESCRIPTION_KEY || k == TAGS_KEY)
    });
    let at = chunks
        .iter()
        .position(|c| c.kind() == IEND_CHUNK)
        .unwrap_or(chunks.len());
    chunks.insert(at, text_chunk(TAGS_KEY, tags));
    chunks.insert(at, text_chunk(DESCRIPTION_KEY, description));

    Ok(png.encoder().bytes())
}

/// `tEXt` for plain ASCII, `iTXt` (uncompressed, UTF-8) otherwise.
fn text_chunk(key: &str, value: &str) -> PngChunk {
    let mut contents = Vec::with_capacity(key.len() + value.len() + 5);
    contents.extend_from_slice(key.as_bytes());
    contents.push(0);
    if value.is_ascii() {
        contents.extend_from_slice(value.as_bytes());
        PngChunk::new(TEXT_CHUNK, Bytes::from(contents))
    } else {
        // compression flag, compression method, empty language, empty translated keyword
        contents.extend_from_slice(&[0, 0, 0, 0]);
        contents.extend_from_slice(value.as_bytes());
        PngChunk::new(ITXT_CHUNK, Bytes::from(contents))
    }
}

fn text_keyword(chunk: &PngChunk) -> Option<String> {
    let kind = chunk.kind();
    if kind != TEXT_CHUNK && kind != ITXT_CHUNK && kind != ZTXT_CHUNK {
        return None;
    }
    let contents = chunk.contents();
    let end = contents.iter().position(|&b| b == 0)?;
    Some(latin1(&contents[..end]))
}

fn png_text_entries(png: &Png) -> Vec<(String, String)> {
    let mut entries = Vec::new();
    for chunk in png.chunks() {
        let contents = chunk.contents();
        let Some(nul) = contents.iter().position(|&b| b == 0) else {
            continue;
        };
        let key = latin1(&contents[..nul]);
        let rest = &contents[nul + 1..];

        match chunk.kind() {
            TEXT_CHUNK => entries.push((key, latin1(rest))),
            ITXT_CHUNK => {
                // Compressed iTXt is not decoded
                if rest.len() < 2 || rest[0] != 0 {
                    continue;
                }
                let mut fields = rest[2..].splitn(3, |&b| b == 0);
                let (Some(_lang), Some(_translated), Some(text)) =
                    (fields.next(), fields.next(), fields.next())
                else {
                    continue;
                };
                entries.push((key, String::from_utf8_lossy(text).into_owned()));
            }
            _ => {}
        }
    }
    entries
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

fn embed_jpeg(data: &[u8], description: &str, tags: &str) -> Result<Bytes, MetadataError> {
    let existing = Jpeg::from_bytes(Bytes::copy_from_slice(data))?
        .exif()
        .and_then(|raw| match exif::Reader::new().read_raw(raw.to_vec()) {
            Ok(exif) => Some(exif),
            Err(e) => {
                tracing::debug!(error = %e, "ignoring unreadable EXIF block");
                None
            }
        });

    let mut fields: Vec<Field> = existing
        .iter()
        .flat_map(|exif| exif.fields())
        .filter(|f| f.ifd_num == In::PRIMARY)
        .filter(|f| !LAYOUT_TAGS.contains(&f.tag) && f.tag != XP_COMMENT && f.tag != XP_KEYWORDS)
        .filter(|f| !matches!(f.value, Value::Unknown(..)))
        .cloned()
        .collect();
    fields.push(Field {
        tag: XP_COMMENT,
        ifd_num: In::PRIMARY,
        value: Value::Byte(description.as_bytes().to_vec()),
    });
    fields.push(Field {
        tag: XP_KEYWORDS,
        ifd_num: In::PRIMARY,
        value: Value::Byte(tags.as_bytes().to_vec()),
    });

    let mut writer = Writer::new();
    for field in &fields {
        writer.push_field(field);
    }
    let mut tiff = Cursor::new(Vec::new());
    writer.write(&mut tiff, false)?;

    let pixels = image::load_from_memory_with_format(data, ImageFormat::Jpeg)?;
    let mut encoded = Vec::new();
    DynamicImage::ImageRgb8(pixels.to_rgb8())
        .write_with_encoder(JpegEncoder::new_with_quality(&mut encoded, JPEG_QUALITY))?;

    let mut jpeg = Jpeg::from_bytes(Bytes::from(encoded))?;
    jpeg.set_exif(Some(Bytes::from(tiff.into_inner())));
    Ok(jpeg.encoder().bytes())
}

fn jpeg_entries(jpeg: &Jpeg) -> Vec<(String, String)> {
    let Some(raw) = jpeg.exif() else {
        return Vec::new();
    };
    let Ok(exif) = exif::Reader::new().read_raw(raw.to_vec()) else {
        return Vec::new();
    };

    let mut entries = Vec::new();
    for (key, tag) in [(DESCRIPTION_KEY, XP_COMMENT), (TAGS_KEY, XP_KEYWORDS)] {
        if let Some(field) = exif.get_field(tag, In::PRIMARY) {
            if let Value::Byte(bytes) = &field.value {
                let text = String::from_utf8_lossy(bytes);
                entries.push((key.to_string(), text.trim_end_matches('\0').to_string()));
            }
        }
    }
    entries
}

/// Errors raised while embedding or reading metadata.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot parse image container: {0}")]
    Container(#[from] img_parts::Error),

    #[error("Cannot re-encode image: {0}")]
    Image(#[from] image::ImageError),

    #[error("Cannot write EXIF: {0}")]
    Exif(#[from] exif::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgb, RgbImage};
    use tempfile::tempdir;

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_png_embed_and_read_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.png");
        RgbImage::from_pixel(8, 6, Rgb([1, 2, 3])).save(&path).unwrap();

        let result = embed(&path, "Red_Bicycle", &tags(&["outdoor", "transport", "red"])).unwrap();
        assert_eq!(result, Embedded::Png);

        let entries = read_back(&path).unwrap();
        assert_eq!(
            entries,
            vec![
                ("Description".to_string(), "Red_Bicycle".to_string()),
                ("Tags".to_string(), "outdoor, transport, red".to_string()),
            ]
        );
        // pixels unchanged
        let img = image::open(&path).unwrap();
        assert_eq!(img.dimensions(), (8, 6));
        assert_eq!(img.to_rgb8().get_pixel(0, 0), &Rgb([1, 2, 3]));
    }

    #[test]
    fn test_png_embed_replaces_previous_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.png");
        RgbImage::from_pixel(4, 4, Rgb([0, 0, 0])).save(&path).unwrap();

        embed(&path, "Old", &tags(&["x"])).unwrap();
        embed(&path, "New", &tags(&["café", "night"])).unwrap();

        let entries = read_back(&path).unwrap();
        assert_eq!(
            entries,
            vec![
                ("Description".to_string(), "New".to_string()),
                ("Tags".to_string(), "café, night".to_string()),
            ]
        );
    }

    #[test]
    fn test_jpeg_embed_and_read_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.jpg");
        RgbImage::from_pixel(16, 12, Rgb([120, 80, 40])).save(&path).unwrap();

        let result = embed(&path, "Red_Bicycle", &tags(&["outdoor", "transport", "red"])).unwrap();
        assert_eq!(result, Embedded::Jpeg);

        let entries = read_back(&path).unwrap();
        assert_eq!(
            entries,
            vec![
                ("Description".to_string(), "Red_Bicycle".to_string()),
                ("Tags".to_string(), "outdoor, transport, red".to_string()),
            ]
        );
        assert_eq!(image::open(&path).unwrap().dimensions(), (16, 12));

        // second embed reuses the existing EXIF block
        embed(&path, "Blue_Car", &tags(&["street"])).unwrap();
        let entries = read_back(&path).unwrap();
        assert_eq!(entries[0].1, "Blue_Car");
        assert_eq!(entries[1].1, "street");
    }

    #[test]
    fn test_other_formats_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.gif");
        RgbImage::from_pixel(4, 4, Rgb([9, 9, 9])).save(&path).unwrap();
        let before = fs::read(&path).unwrap();

        let result = embed(&path, "x", &tags(&["y"])).unwrap();
        assert_eq!(result, Embedded::Unsupported(Some(ImageFormat::Gif)));
        assert_eq!(fs::read(&path).unwrap(), before);
        assert!(read_back(&path).unwrap().is_empty());
    }

    #[test]
    fn test_format_from_header_not_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("really_png.jpg");
        RgbImage::from_pixel(4, 4, Rgb([9, 9, 9]))
            .save_with_format(&path, ImageFormat::Png)
            .unwrap();
        assert_eq!(detect_format(&path).unwrap(), Some(ImageFormat::Png));
        assert_eq!(embed(&path, "x", &tags(&["y"])).unwrap(), Embedded::Png);
    }
}
