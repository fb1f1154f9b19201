// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! EPUB engine adapter.
//!
//! Parses the EPUB container (zip), locates the OPF package document via
//! `META-INF/container.xml`, and reads the spine to build the location
//! index used for percentage-accurate navigation. Position tokens are
//! CFI-style spine references (`epubcfi(/6/4)` addresses the second
//! spine item), stable across rendered page sizes.

use std::io::{Cursor, Read};

use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::reader::Reader;

use super::{DocumentEngine, RenderError};
use crate::models::DocumentFormat;

/// One spine entry, in reading order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpineItem {
    pub idref: String,
    pub href: String,
}

/// Reflowable e-book engine.
pub struct EpubEngine {
    raw_bytes: Vec<u8>,
    spine: Vec<SpineItem>,
}

impl EpubEngine {
    pub fn new(raw_bytes: Vec<u8>) -> Self {
        Self {
            raw_bytes,
            spine: Vec::new(),
        }
    }

    /// Reading-order spine, available once indexed.
    pub fn spine(&self) -> &[SpineItem] {
        &self.spine
    }
}

#[async_trait]
impl DocumentEngine for EpubEngine {
    fn format(&self) -> DocumentFormat {
        DocumentFormat::Epub
    }

    async fn build_index(&mut self) -> Result<usize, RenderError> {
        let mut archive = zip::ZipArchive::new(Cursor::new(self.raw_bytes.as_slice()))
            .map_err(|e| RenderError::Malformed(format!("not an EPUB container: {e}")))?;

        let container_xml = read_entry(&mut archive, "META-INF/container.xml")?;
        let opf_path = parse_container_rootfile(&container_xml)?;

        let opf_xml = read_entry(&mut archive, &opf_path)?;
        self.spine = parse_opf_spine(&opf_xml)?;

        if self.spine.is_empty() {
            return Err(RenderError::Malformed("OPF spine is empty".into()));
        }
        Ok(self.spine.len())
    }

    fn token_for_unit(&self, unit: usize) -> String {
        // Spine element is the third child of <package>: CFI step /6.
        // Spine children are even steps, 1-based.
        format!("epubcfi(/6/{})", 2 * (unit + 1))
    }

    fn unit_for_token(&self, token: &str) -> Option<usize> {
        let inner = token.strip_prefix("epubcfi(/6/")?.strip_suffix(')')?;
        // Deeper CFIs ("/6/8!/4/10:3") resolve to their spine item.
        let step_text = inner.split(['/', '!', ':']).next()?;
        let step: usize = step_text.parse().ok()?;
        if step < 2 || step % 2 != 0 {
            return None;
        }
        let unit = step / 2 - 1;
        (unit < self.spine.len()).then_some(unit)
    }
}

/// Read one archive entry fully into memory.
fn read_entry(
    archive: &mut zip::ZipArchive<Cursor<&[u8]>>,
    name: &str,
) -> Result<Vec<u8>, RenderError> {
    let mut entry = archive
        .by_name(name)
        .map_err(|e| RenderError::Malformed(format!("missing {name}: {e}")))?;
    let mut bytes = Vec::with_capacity(entry.size() as usize);
    entry
        .read_to_end(&mut bytes)
        .map_err(|e| RenderError::Malformed(format!("unreadable {name}: {e}")))?;
    Ok(bytes)
}

/// Extract the OPF path from `META-INF/container.xml`.
fn parse_container_rootfile(content: &[u8]) -> Result<String, RenderError> {
    let mut reader = Reader::from_reader(content);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::with_capacity(64);

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if local_name(e.name().as_ref()) == b"rootfile" => {
                for attr in e.attributes().flatten() {
                    if attr.key.as_ref() == b"full-path" {
                        let path = reader
                            .decoder()
                            .decode(attr.value.as_ref())
                            .unwrap_or_default();
                        return Ok(path.into_owned());
                    }
                }
            }
            Ok(Event::Eof) => {
                return Err(RenderError::Malformed(
                    "container.xml has no rootfile entry".into(),
                ))
            }
            Err(e) => return Err(RenderError::Malformed(format!("container.xml: {e}"))),
            _ => {}
        }
        buf.clear();
    }
}

/// Parse the OPF manifest and spine into reading-order items.
fn parse_opf_spine(content: &[u8]) -> Result<Vec<SpineItem>, RenderError> {
    let mut reader = Reader::from_reader(content);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::with_capacity(64);

    // manifest id → href
    let mut manifest: Vec<(String, String)> = Vec::new();
    // spine idrefs in document order
    let mut spine_refs: Vec<String> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match local_name(e.name().as_ref()) {
                b"item" => {
                    let mut id = None;
                    let mut href = None;
                    for attr in e.attributes().flatten() {
                        let value = reader
                            .decoder()
                            .decode(attr.value.as_ref())
                            .unwrap_or_default()
                            .into_owned();
                        match attr.key.as_ref() {
                            b"id" => id = Some(value),
                            b"href" => href = Some(value),
                            _ => {}
                        }
                    }
                    if let (Some(id), Some(href)) = (id, href) {
                        manifest.push((id, href));
                    }
                }
                b"itemref" => {
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"idref" {
                            let idref = reader
                                .decoder()
                                .decode(attr.value.as_ref())
                                .unwrap_or_default();
                            spine_refs.push(idref.into_owned());
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(RenderError::Malformed(format!("OPF: {e}"))),
            _ => {}
        }
        buf.clear();
    }

    let spine = spine_refs
        .into_iter()
        .map(|idref| {
            let href = manifest
                .iter()
                .find(|(id, _)| *id == idref)
                .map(|(_, href)| href.clone())
                .ok_or_else(|| {
                    RenderError::Malformed(format!("spine idref {idref} not in manifest"))
                })?;
            Ok(SpineItem { idref, href })
        })
        .collect::<Result<Vec<_>, RenderError>>()?;

    Ok(spine)
}

/// Local part of a possibly-prefixed XML name.
fn local_name(name: &[u8]) -> &[u8] {
    name.rsplit(|&b| b == b':').next().unwrap_or(name)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    const CONTAINER_XML: &str = r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

    const CONTENT_OPF: &str = r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="id">
  <metadata><dc:title xmlns:dc="http://purl.org/dc/elements/1.1/">Fixture</dc:title></metadata>
  <manifest>
    <item id="ch1" href="ch1.xhtml" media-type="application/xhtml+xml"/>
    <item id="ch2" href="ch2.xhtml" media-type="application/xhtml+xml"/>
    <item id="ch3" href="ch3.xhtml" media-type="application/xhtml+xml"/>
    <item id="css" href="style.css" media-type="text/css"/>
  </manifest>
  <spine>
    <itemref idref="ch1"/>
    <itemref idref="ch2"/>
    <itemref idref="ch3"/>
  </spine>
</package>"#;

    /// Build a minimal three-chapter EPUB in memory.
    pub fn fixture_epub() -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let options =
                SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);

            writer.start_file("mimetype", options).unwrap();
            writer.write_all(b"application/epub+zip").unwrap();

            writer.start_file("META-INF/container.xml", options).unwrap();
            writer.write_all(CONTAINER_XML.as_bytes()).unwrap();

            writer.start_file("OEBPS/content.opf", options).unwrap();
            writer.write_all(CONTENT_OPF.as_bytes()).unwrap();

            for chapter in ["ch1", "ch2", "ch3"] {
                writer
                    .start_file(format!("OEBPS/{chapter}.xhtml"), options)
                    .unwrap();
                writer
                    .write_all(format!("<html><body>{chapter}</body></html>").as_bytes())
                    .unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[tokio::test]
    async fn indexes_spine_in_reading_order() {
        let mut engine = EpubEngine::new(fixture_epub());
        let total = engine.build_index().await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(engine.spine()[0].href, "ch1.xhtml");
        assert_eq!(engine.spine()[2].idref, "ch3");
    }

    #[tokio::test]
    async fn cfi_tokens_round_trip() {
        let mut engine = EpubEngine::new(fixture_epub());
        engine.build_index().await.unwrap();

        assert_eq!(engine.token_for_unit(0), "epubcfi(/6/2)");
        assert_eq!(engine.token_for_unit(1), "epubcfi(/6/4)");
        assert_eq!(engine.unit_for_token("epubcfi(/6/4)"), Some(1));
        assert_eq!(engine.unit_for_token("epubcfi(/6/6)"), Some(2));
    }

    #[tokio::test]
    async fn deep_cfi_resolves_to_spine_item() {
        let mut engine = EpubEngine::new(fixture_epub());
        engine.build_index().await.unwrap();
        assert_eq!(engine.unit_for_token("epubcfi(/6/4!/4/10:3)"), Some(1));
    }

    #[tokio::test]
    async fn foreign_tokens_are_rejected() {
        let mut engine = EpubEngine::new(fixture_epub());
        engine.build_index().await.unwrap();

        assert_eq!(engine.unit_for_token("page:4"), None);
        assert_eq!(engine.unit_for_token("epubcfi(/6/3)"), None); // odd step
        assert_eq!(engine.unit_for_token("epubcfi(/6/12)"), None); // past spine
    }

    #[tokio::test]
    async fn malformed_bytes_fail_typed() {
        let mut engine = EpubEngine::new(b"certainly not a zip archive".to_vec());
        let err = engine.build_index().await.unwrap_err();
        assert!(matches!(err, RenderError::Malformed(_)));
    }

    #[tokio::test]
    async fn spine_idref_missing_from_manifest_is_malformed() {
        let opf = CONTENT_OPF.replace(r#"<item id="ch2" href="ch2.xhtml" media-type="application/xhtml+xml"/>"#, "");
        let spine = parse_opf_spine(opf.as_bytes());
        assert!(spine.is_err());
    }
}
