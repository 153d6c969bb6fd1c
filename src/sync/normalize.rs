use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::{BufWriter, Cursor, Write};
use std::path::Path;

use image::DynamicImage;
use image::codecs::jpeg::JpegEncoder;
use tracing::debug;

use crate::error::NormalizeError;
use crate::state::temp_sibling;

/// Cache file name for a remote asset id.
///
/// ASCII letters, digits, `-` and `_` pass through; every other byte becomes
/// `~XX`. Since `~` itself is escaped the mapping is injective, so two ids can
/// never share a file.
pub fn local_file_for(id: &str) -> String {
    let mut name = String::with_capacity(id.len() + 4);
    for byte in id.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' => name.push(byte as char),
            other => {
                let _ = write!(name, "~{other:02X}");
            }
        }
    }
    name.push_str(".jpg");
    name
}

/// Decodes `bytes`, applies EXIF orientation, and writes an RGB JPEG to `dest`
/// through a temp file so `dest` is either absent or complete.
pub fn normalize_to_jpeg(bytes: &[u8], dest: &Path, quality: u8) -> Result<(), NormalizeError> {
    let decoded = image::load_from_memory(bytes).map_err(NormalizeError::Decode)?;
    let orientation = read_orientation(bytes).unwrap_or(1);
    let rgb = apply_orientation(decoded, orientation).to_rgb8();

    let tmp = temp_sibling(dest);
    let io_err = |source| NormalizeError::Io {
        path: tmp.clone(),
        source,
    };
    let file = File::create(&tmp).map_err(io_err)?;
    let mut writer = BufWriter::new(file);
    let encoded = JpegEncoder::new_with_quality(&mut writer, quality)
        .encode_image(&rgb)
        .map_err(NormalizeError::Encode);
    if let Err(err) = encoded {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }
    let file = writer
        .into_inner()
        .map_err(|err| io_err(err.into_error()))?;
    file.sync_all().map_err(io_err)?;
    drop(file);

    fs::rename(&tmp, dest).map_err(|source| NormalizeError::Io {
        path: dest.to_path_buf(),
        source,
    })?;
    debug!(
        path = %dest.display(),
        width = rgb.width(),
        height = rgb.height(),
        orientation,
        "normalized asset"
    );
    Ok(())
}

fn read_orientation(bytes: &[u8]) -> Option<u32> {
    let exif = exif::Reader::new()
        .read_from_container(&mut Cursor::new(bytes))
        .ok()?;
    exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?
        .value
        .get_uint(0)
}

fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}
