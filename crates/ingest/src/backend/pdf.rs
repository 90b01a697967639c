use std::cell::OnceCell;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use chrono::{FixedOffset, NaiveDateTime, TimeZone};
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use lopdf::{Dictionary, Document, Object, ObjectId};

use super::{
    BackendError, ColorSpace, DocumentHandle, DocumentInfo, ExtractionBackend, ImageRef, RawImage,
};

/// PDF documents through `lopdf`, with `pdf-extract` as a second opinion on
/// page text.
#[derive(Debug, Default)]
pub struct PdfBackend;

impl PdfBackend {
    pub fn new() -> Self {
        Self
    }
}

impl ExtractionBackend for PdfBackend {
    fn open(&self, path: &Path) -> Result<Box<dyn DocumentHandle>, BackendError> {
        let bytes = std::fs::read(path)?;
        let doc = Document::load_mem(&bytes).map_err(|e| BackendError::Open(e.to_string()))?;
        if doc.is_encrypted() {
            return Err(BackendError::Open("document is encrypted".to_string()));
        }
        let pages = doc.get_pages().into_values().collect();
        Ok(Box::new(PdfHandle {
            path: path.to_path_buf(),
            bytes,
            doc: Some(doc),
            pages,
            fallback: OnceCell::new(),
        }))
    }
}

struct PdfHandle {
    path: PathBuf,
    bytes: Vec<u8>,
    doc: Option<Document>,
    /// Page object ids in page order.
    pages: Vec<ObjectId>,
    /// Whole-document text from pdf-extract, split on form feeds. Computed on
    /// first use; `None` when pdf-extract could not read the file.
    fallback: OnceCell<Option<Vec<String>>>,
}

const MAX_PARENT_DEPTH: usize = 32;

impl PdfHandle {
    fn doc(&self) -> Result<&Document, BackendError> {
        self.doc
            .as_ref()
            .ok_or_else(|| BackendError::Open("document already closed".to_string()))
    }

    fn page_id(&self, page: usize) -> Result<ObjectId, BackendError> {
        self.pages.get(page).copied().ok_or_else(|| BackendError::Page {
            page,
            detail: format!("document has {} pages", self.pages.len()),
        })
    }

    fn fallback_page(&self, page: usize) -> Option<&str> {
        self.fallback
            .get_or_init(|| {
                // pdf-extract panics on some malformed files.
                let extracted = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    pdf_extract::extract_text_from_mem(&self.bytes)
                }));
                match extracted {
                    Ok(Ok(text)) => Some(text.split('\x0C').map(str::to_string).collect()),
                    Ok(Err(e)) => {
                        tracing::debug!(path = %self.path.display(), error = %e, "pdf-extract failed");
                        None
                    }
                    Err(_) => {
                        tracing::debug!(path = %self.path.display(), "pdf-extract panicked");
                        None
                    }
                }
            })
            .as_ref()
            .and_then(|pages| pages.get(page))
            .map(String::as_str)
    }

    /// Resources of a page, following `/Parent` for inherited entries.
    fn page_resources<'a>(&self, doc: &'a Document, page_id: ObjectId) -> Option<&'a Dictionary> {
        let mut current = doc.get_dictionary(page_id).ok()?;
        for _ in 0..MAX_PARENT_DEPTH {
            if let Ok(res) = current.get(b"Resources") {
                return resolve(doc, res).ok()?.as_dict().ok();
            }
            let parent = current.get(b"Parent").ok()?.as_reference().ok()?;
            current = doc.get_dictionary(parent).ok()?;
        }
        None
    }
}

impl DocumentHandle for PdfHandle {
    fn path(&self) -> &Path {
        &self.path
    }

    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page_text(&self, page: usize) -> Result<String, BackendError> {
        let doc = self.doc()?;
        self.page_id(page)?;
        let page_no = (page + 1) as u32;
        match doc.extract_text(&[page_no]) {
            Ok(text) if !text.trim().is_empty() => Ok(text),
            Ok(text) => Ok(self
                .fallback_page(page)
                .filter(|t| !t.trim().is_empty())
                .map(str::to_string)
                .unwrap_or(text)),
            Err(e) => self
                .fallback_page(page)
                .map(str::to_string)
                .ok_or_else(|| BackendError::Page {
                    page,
                    detail: e.to_string(),
                }),
        }
    }

    fn page_images(&self, page: usize) -> Result<Vec<ImageRef>, BackendError> {
        let doc = self.doc()?;
        let page_id = self.page_id(page)?;
        let Some(resources) = self.page_resources(doc, page_id) else {
            return Ok(Vec::new());
        };
        let xobjects = match resources.get(b"XObject") {
            Ok(obj) => resolve(doc, obj)
                .and_then(|o| o.as_dict())
                .map_err(|e| BackendError::Image(e.to_string()))?,
            Err(_) => return Ok(Vec::new()),
        };

        let mut refs = Vec::new();
        for (name, obj) in xobjects.iter() {
            let Ok(id) = obj.as_reference() else { continue };
            let Ok(stream) = doc.get_object(id).and_then(|o| o.as_stream()) else {
                continue;
            };
            let is_image = stream
                .dict
                .get(b"Subtype")
                .and_then(|s| s.as_name())
                .map(|n| n == b"Image")
                .unwrap_or(false);
            if is_image {
                refs.push(ImageRef {
                    id: encode_id(id),
                    name: String::from_utf8_lossy(name).into_owned(),
                });
            }
        }
        Ok(refs)
    }

    fn extract_image(&self, _page: usize, image: &ImageRef) -> Result<RawImage, BackendError> {
        let doc = self.doc()?;
        let stream = doc
            .get_object(decode_id(image.id))
            .and_then(|o| o.as_stream())
            .map_err(|e| BackendError::Image(format!("{}: {e}", image.name)))?;
        let colorspace = colorspace_of(doc, &stream.dict);
        let filters = filter_names(doc, &stream.dict);

        match filters.last().map(Vec::as_slice) {
            Some(b"DCTDecode") if filters.len() == 1 => {
                return Ok(RawImage {
                    bytes: stream.content.clone(),
                    colorspace,
                    extension: "jpeg".to_string(),
                })
            }
            Some(b"JPXDecode") if filters.len() == 1 => {
                return Ok(RawImage {
                    bytes: stream.content.clone(),
                    colorspace,
                    extension: "jpx".to_string(),
                })
            }
            _ => {}
        }

        let data = if filters.is_empty() {
            stream.content.clone()
        } else {
            stream
                .decompressed_content()
                .map_err(|e| BackendError::Image(format!("{}: {e}", image.name)))?
        };
        let int = |key: &[u8]| {
            stream
                .dict
                .get(key)
                .and_then(|o| o.as_i64())
                .map_err(|_| BackendError::Image(format!("{}: missing {}", image.name, String::from_utf8_lossy(key))))
        };
        let width = u32::try_from(int(b"Width")?)
            .map_err(|_| BackendError::Image(format!("{}: bad width", image.name)))?;
        let height = u32::try_from(int(b"Height")?)
            .map_err(|_| BackendError::Image(format!("{}: bad height", image.name)))?;
        let bpc = int(b"BitsPerComponent").unwrap_or(8);
        if bpc != 8 {
            return Err(BackendError::Image(format!(
                "{}: unsupported {bpc} bits per component",
                image.name
            )));
        }

        let bytes = encode_png(width, height, colorspace, data)
            .ok_or_else(|| BackendError::Image(format!("{}: cannot re-encode raw samples", image.name)))?;
        Ok(RawImage {
            bytes,
            colorspace,
            extension: "png".to_string(),
        })
    }

    fn info(&self) -> DocumentInfo {
        let Ok(doc) = self.doc() else {
            return DocumentInfo::default();
        };
        let info = doc
            .trailer
            .get(b"Info")
            .ok()
            .and_then(|o| resolve(doc, o).ok())
            .and_then(|o| o.as_dict().ok());
        let Some(info) = info else {
            tracing::debug!(path = %self.path.display(), "no Info dictionary");
            return DocumentInfo::default();
        };

        let get_string = |key: &[u8]| -> Option<String> {
            match info.get(key).ok().and_then(|o| resolve(doc, o).ok())? {
                Object::String(bytes, _) => Some(decode_pdf_string(bytes)),
                _ => None,
            }
        };

        DocumentInfo {
            title: get_string(b"Title"),
            author: get_string(b"Author"),
            creation_date: get_string(b"CreationDate")
                .map(|raw| parse_pdf_date(&raw).unwrap_or(raw)),
        }
    }

    fn close(&mut self) {
        self.doc = None;
        self.bytes = Vec::new();
        self.fallback = OnceCell::new();
    }
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> lopdf::Result<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id),
        other => Ok(other),
    }
}

fn encode_id((num, gen): ObjectId) -> u64 {
    (u64::from(num) << 16) | u64::from(gen)
}

fn decode_id(id: u64) -> ObjectId {
    ((id >> 16) as u32, (id & 0xFFFF) as u16)
}

fn filter_names(doc: &Document, dict: &Dictionary) -> Vec<Vec<u8>> {
    let Some(filter) = dict.get(b"Filter").ok().and_then(|f| resolve(doc, f).ok()) else {
        return Vec::new();
    };
    match filter {
        Object::Name(name) => vec![name.clone()],
        Object::Array(items) => items
            .iter()
            .filter_map(|o| o.as_name().ok().map(<[u8]>::to_vec))
            .collect(),
        _ => Vec::new(),
    }
}

fn colorspace_of(doc: &Document, dict: &Dictionary) -> ColorSpace {
    let Some(cs) = dict.get(b"ColorSpace").ok().and_then(|o| resolve(doc, o).ok()) else {
        return ColorSpace::Unknown;
    };
    match cs {
        Object::Name(name) => colorspace_by_name(name),
        Object::Array(items) => {
            let Some(family) = items.first().and_then(|o| o.as_name().ok()) else {
                return ColorSpace::Unknown;
            };
            match family {
                b"ICCBased" => items
                    .get(1)
                    .and_then(|o| resolve(doc, o).ok())
                    .and_then(|o| o.as_stream().ok())
                    .and_then(|s| s.dict.get(b"N").and_then(|n| n.as_i64()).ok())
                    .map(ColorSpace::from_components)
                    .unwrap_or(ColorSpace::Unknown),
                b"Indexed" | b"I" => ColorSpace::Indexed,
                other => colorspace_by_name(other),
            }
        }
        _ => ColorSpace::Unknown,
    }
}

fn colorspace_by_name(name: &[u8]) -> ColorSpace {
    match name {
        b"DeviceGray" | b"CalGray" | b"G" => ColorSpace::Gray,
        b"DeviceRGB" | b"CalRGB" | b"RGB" => ColorSpace::Rgb,
        b"DeviceCMYK" | b"CMYK" => ColorSpace::Cmyk,
        b"Indexed" | b"I" => ColorSpace::Indexed,
        _ => ColorSpace::Unknown,
    }
}

/// Wrap decoded 8-bit samples in a PNG container.
fn encode_png(width: u32, height: u32, colorspace: ColorSpace, data: Vec<u8>) -> Option<Vec<u8>> {
    let img = match colorspace {
        ColorSpace::Gray => DynamicImage::ImageLuma8(GrayImage::from_raw(width, height, data)?),
        ColorSpace::Rgb => DynamicImage::ImageRgb8(RgbImage::from_raw(width, height, data)?),
        ColorSpace::Cmyk => {
            let rgb: Vec<u8> = data
                .chunks_exact(4)
                .flat_map(|px| {
                    let k = u16::from(px[3]);
                    [0, 1, 2].map(|i| (255 - (u16::from(px[i]) + k).min(255)) as u8)
                })
                .collect();
            DynamicImage::ImageRgb8(RgbImage::from_raw(width, height, rgb)?)
        }
        ColorSpace::Indexed | ColorSpace::Unknown => return None,
    };
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).ok()?;
    Some(buf)
}

/// PDF text strings are UTF-16BE with a BOM, UTF-8, or PDFDocEncoding
/// (treated as Latin-1).
fn decode_pdf_string(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    String::from_utf8(bytes.to_vec()).unwrap_or_else(|_| bytes.iter().map(|&b| b as char).collect())
}

/// Convert a PDF date (`D:YYYYMMDDHHmmSSOHH'mm'`) to RFC 3339. Missing
/// trailing fields default to the start of their range; a missing offset is UTC.
fn parse_pdf_date(raw: &str) -> Option<String> {
    let s = raw.trim();
    let s = s.strip_prefix("D:").unwrap_or(s);
    let digits: String = s.chars().take_while(char::is_ascii_digit).take(14).collect();
    if digits.len() < 4 || digits.len() % 2 != 0 {
        return None;
    }
    const DEFAULTS: &str = "00000101000000";
    let padded = format!("{digits}{}", &DEFAULTS[digits.len()..]);
    let naive = NaiveDateTime::parse_from_str(&padded, "%Y%m%d%H%M%S").ok()?;

    let rest = &s[digits.len()..];
    let offset_secs = match rest.chars().next() {
        Some(sign @ ('+' | '-')) => {
            let tz: String = rest[1..].chars().filter(char::is_ascii_digit).take(4).collect();
            let hours: i32 = tz.get(0..2)?.parse().ok()?;
            let minutes: i32 = tz.get(2..4).and_then(|m| m.parse().ok()).unwrap_or(0);
            let secs = hours * 3600 + minutes * 60;
            if sign == '-' {
                -secs
            } else {
                secs
            }
        }
        _ => 0,
    };
    let offset = FixedOffset::east_opt(offset_secs)?;
    Some(offset.from_local_datetime(&naive).single()?.to_rfc3339())
}
