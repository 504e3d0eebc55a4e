//! Integration tests for ResizeService
//!
//! These tests verify:
//! - End-to-end resizing of flat and packaged workbooks
//! - Asset name repair for legacy-encoded archive entries
//! - Workspace cleanup and output atomicity on failure
//! - Error classification for bad inputs

use camino::{Utf8Path, Utf8PathBuf};
use dash_resizer::services::Document;
use dash_resizer::{ResizeError, ResizeRequest, ResizeService, ResizerSettings};
use std::fs::{self, File};
use std::io::{Read, Write};
use tempfile::TempDir;
use zip::ZipArchive;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

const WORKBOOK: &str = r#"<?xml version='1.0' encoding='utf-8' ?>
<workbook source-build='2023.1.0' version='18.1'>
  <!-- keep me -->
  <datasources>
    <datasource name='federated'>
      <connection class='textscan' filename='Data/Files/café.csv' />
    </datasource>
  </datasources>
  <dashboards>
    <dashboard name='Dash1'>
      <size maxheight='768000' maxwidth='1366000' minheight='768000' minwidth='1366000' />
      <zones>
        <zone h='50000' id='3' type-v2='layout-basic' w='50000' x='25000' y='25000'>
          <zone h="50000" id="4" name="Sheet 1" w="50000" x="25000" y="25000" />
        </zone>
      </zones>
    </dashboard>
    <dashboard name='Dash2'>
      <size maxheight='800' maxwidth='1000' />
      <zones>
        <zone h='100000' id='5' w='100000' x='0' y='0' />
      </zones>
    </dashboard>
  </dashboards>
  <windows>
    <window class='dashboard' name='Dash1'>
      <image-path>Image/ロゴ.png</image-path>
    </window>
  </windows>
</workbook>
"#;

const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nfake image payload";
const CSV_BYTES: &[u8] = b"region,sales\nnorth,10\n";

struct Fixture {
    _temp_dir: TempDir,
    root: Utf8PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        fs::create_dir_all(root.join("out")).unwrap();
        fs::create_dir_all(root.join("work")).unwrap();
        Self {
            _temp_dir: temp_dir,
            root,
        }
    }

    fn settings(&self) -> ResizerSettings {
        ResizerSettings {
            output_dir: self.root.join("out").to_string(),
            work_dir: self.root.join("work").to_string(),
            ..ResizerSettings::default()
        }
    }

    fn service(&self) -> ResizeService {
        ResizeService::new(self.settings()).unwrap()
    }

    fn path(&self, name: &str) -> Utf8PathBuf {
        self.root.join(name)
    }

    fn output_files(&self) -> Vec<Utf8PathBuf> {
        let mut files: Vec<_> = self
            .root
            .join("out")
            .read_dir_utf8()
            .unwrap()
            .map(|e| e.unwrap().path().to_path_buf())
            .collect();
        files.sort();
        files
    }

    fn work_dir_is_empty(&self) -> bool {
        self.root.join("work").read_dir_utf8().unwrap().next().is_none()
    }
}

/// Build a packaged workbook with UTF-8 flagged entry names.
fn write_packaged(path: &Utf8Path, entries: &[(&str, &[u8])]) {
    let mut zip = ZipWriter::new(File::create(path).unwrap());
    for (name, data) in entries {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap();
}

/// Build a stored zip whose entry names are raw bytes without the UTF-8 flag.
fn write_raw_zip(path: &Utf8Path, entries: &[(&[u8], &[u8])]) {
    // 2024-01-01 00:00:00
    const DOS_DATE: u16 = ((2024 - 1980) << 9) | (1 << 5) | 1;

    let mut out = Vec::new();
    let mut central = Vec::new();

    for (name, data) in entries {
        let offset = out.len() as u32;
        let crc = crc32fast::hash(data);
        let size = data.len() as u32;

        out.extend_from_slice(&0x0403_4b50u32.to_le_bytes());
        out.extend_from_slice(&20u16.to_le_bytes()); // version needed
        out.extend_from_slice(&0u16.to_le_bytes()); // flags
        out.extend_from_slice(&0u16.to_le_bytes()); // stored
        out.extend_from_slice(&0u16.to_le_bytes()); // time
        out.extend_from_slice(&DOS_DATE.to_le_bytes());
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&size.to_le_bytes());
        out.extend_from_slice(&size.to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // extra length
        out.extend_from_slice(name);
        out.extend_from_slice(data);

        central.extend_from_slice(&0x0201_4b50u32.to_le_bytes());
        central.extend_from_slice(&20u16.to_le_bytes()); // version made by
        central.extend_from_slice(&20u16.to_le_bytes()); // version needed
        central.extend_from_slice(&0u16.to_le_bytes()); // flags
        central.extend_from_slice(&0u16.to_le_bytes()); // stored
        central.extend_from_slice(&0u16.to_le_bytes()); // time
        central.extend_from_slice(&DOS_DATE.to_le_bytes());
        central.extend_from_slice(&crc.to_le_bytes());
        central.extend_from_slice(&size.to_le_bytes());
        central.extend_from_slice(&size.to_le_bytes());
        central.extend_from_slice(&(name.len() as u16).to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes()); // extra length
        central.extend_from_slice(&0u16.to_le_bytes()); // comment length
        central.extend_from_slice(&0u16.to_le_bytes()); // disk number
        central.extend_from_slice(&0u16.to_le_bytes()); // internal attributes
        central.extend_from_slice(&0u32.to_le_bytes()); // external attributes
        central.extend_from_slice(&offset.to_le_bytes());
        central.extend_from_slice(name);
    }

    let central_offset = out.len() as u32;
    out.extend_from_slice(&central);
    out.extend_from_slice(&0x0605_4b50u32.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    out.extend_from_slice(&(central.len() as u32).to_le_bytes());
    out.extend_from_slice(&central_offset.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());

    fs::write(path, out).unwrap();
}

fn read_entries(path: &Utf8Path) -> Vec<(String, Vec<u8>)> {
    let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
    let mut entries = Vec::new();
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).unwrap();
        let mut data = Vec::new();
        entry.read_to_end(&mut data).unwrap();
        entries.push((entry.name().to_string(), data));
    }
    entries
}

fn entry<'a>(entries: &'a [(String, Vec<u8>)], name: &str) -> &'a [u8] {
    entries
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, data)| data.as_slice())
        .unwrap_or_else(|| panic!("entry {} missing", name))
}

fn attribute(document: &mut Document, tag: &str, id: &str, key: &str) -> String {
    document
        .find_element_mut(|e| e.is(tag) && e.attribute("id").ok().flatten().as_deref() == Some(id))
        .unwrap()
        .attribute(key)
        .unwrap()
        .unwrap()
}

#[test]
fn test_resize_flat_workbook() {
    let fixture = Fixture::new();
    let source = fixture.path("Sales.twb");
    fs::write(&source, WORKBOOK).unwrap();

    let request = ResizeRequest::new(&source, "Dash1", "2000", "1000").unwrap();
    let report = fixture.service().resize(&request).unwrap();

    assert!(report.dashboard_found);
    assert_eq!(report.zones_rescaled, 2);
    let name = report.output_path.file_name().unwrap();
    assert!(name.starts_with("Sales_resized_"));
    assert!(name.ends_with(".twb"));
    assert_eq!(fixture.output_files(), vec![report.output_path.clone()]);

    let text = fs::read_to_string(&report.output_path).unwrap();
    assert!(text.contains("<size maxheight='1000' maxwidth='2000' minheight='1000' minwidth='2000'/>"));
    assert!(text.contains("<!-- keep me -->"));

    let mut document = Document::parse(&text).unwrap();
    for id in ["3", "4"] {
        assert_eq!(attribute(&mut document, "zone", id, "w"), "34150000");
        assert_eq!(attribute(&mut document, "zone", id, "x"), "17075000");
        assert_eq!(attribute(&mut document, "zone", id, "h"), "38400000");
        assert_eq!(attribute(&mut document, "zone", id, "y"), "19200000");
    }

    // The other dashboard is untouched
    assert_eq!(attribute(&mut document, "zone", "5", "w"), "100000");
    assert!(text.contains("<size maxheight='800' maxwidth='1000' />"));

    // Source is never modified
    assert_eq!(fs::read_to_string(&source).unwrap(), WORKBOOK);
    assert!(fixture.work_dir_is_empty());
}

#[test]
fn test_resize_packaged_workbook() {
    let fixture = Fixture::new();
    let source = fixture.path("Sales.twbx");
    write_packaged(
        &source,
        &[
            ("Original Name.twb", WORKBOOK.as_bytes()),
            ("Data/Files/café.csv", CSV_BYTES),
            ("Image/ロゴ.png", PNG_BYTES),
        ],
    );

    let request = ResizeRequest::new(&source, "Dash1", "2000", "1000").unwrap();
    let report = fixture.service().resize(&request).unwrap();

    assert!(report.output_path.as_str().ends_with(".twbx"));
    assert!(report.asset_renames.is_empty());

    let entries = read_entries(&report.output_path);
    assert_eq!(entries.len(), 3);
    assert_eq!(entry(&entries, "Data/Files/café.csv"), CSV_BYTES);
    assert_eq!(entry(&entries, "Image/ロゴ.png"), PNG_BYTES);

    let document = String::from_utf8(entry(&entries, "Sales.twb").to_vec()).unwrap();
    assert!(document.contains("maxwidth='2000'"));
    assert!(document.contains("w='34150000'"));

    assert!(fixture.work_dir_is_empty());
}

#[test]
fn test_legacy_entry_names_are_repaired() {
    let fixture = Fixture::new();
    let source = fixture.path("Legacy.twbx");

    let (sjis_logo, _, _) = encoding_rs::SHIFT_JIS.encode("Image/ロゴ.png");
    write_raw_zip(
        &source,
        &[
            (b"Legacy.twb".as_slice(), WORKBOOK.as_bytes()),
            // UTF-8 bytes without the flag read back as half-width katakana
            ("Data/Files/café.csv".as_bytes(), CSV_BYTES),
            (sjis_logo.as_ref(), PNG_BYTES),
        ],
    );

    let request = ResizeRequest::new(&source, "Dash1", "2000", "1000").unwrap();
    let report = fixture.service().resize(&request).unwrap();

    assert_eq!(report.asset_renames.len(), 1);
    assert_eq!(report.asset_renames[0].to, Utf8PathBuf::from("Data/Files/café.csv"));

    let entries = read_entries(&report.output_path);
    assert_eq!(entry(&entries, "Data/Files/café.csv"), CSV_BYTES);
    assert_eq!(entry(&entries, "Image/ロゴ.png"), PNG_BYTES);
    assert!(fixture.work_dir_is_empty());
}

#[test]
fn test_missing_dashboard_is_a_no_op() {
    let fixture = Fixture::new();
    let source = fixture.path("Sales.twb");
    fs::write(&source, WORKBOOK).unwrap();

    let request = ResizeRequest::new(&source, "Nope", "2000", "1000").unwrap();
    let report = fixture.service().resize(&request).unwrap();

    assert!(!report.dashboard_found);
    assert_eq!(report.zones_rescaled, 0);
    assert_eq!(fs::read_to_string(&report.output_path).unwrap(), WORKBOOK);
}

#[test]
fn test_strict_lookup_rejects_missing_dashboard() {
    let fixture = Fixture::new();
    let source = fixture.path("Sales.twb");
    fs::write(&source, WORKBOOK).unwrap();

    let settings = ResizerSettings {
        strict_dashboard_lookup: true,
        ..fixture.settings()
    };
    let service = ResizeService::new(settings).unwrap();
    let request = ResizeRequest::new(&source, "Nope", "2000", "1000").unwrap();

    let err = service.resize(&request).unwrap_err();
    assert!(matches!(err, ResizeError::ElementNotFound(ref name) if name == "Nope"));
    assert!(fixture.output_files().is_empty());
    assert!(fixture.work_dir_is_empty());
}

#[test]
fn test_missing_workbook() {
    let fixture = Fixture::new();
    let request = ResizeRequest::new(fixture.path("Missing.twbx"), "Dash1", "2000", "1000").unwrap();

    let err = fixture.service().resize(&request).unwrap_err();
    assert!(matches!(err, ResizeError::NotFound(_)));
}

#[test]
fn test_corrupt_archive() {
    let fixture = Fixture::new();
    let source = fixture.path("Broken.twbx");
    fs::write(&source, b"this is not a zip file at all").unwrap();

    let request = ResizeRequest::new(&source, "Dash1", "2000", "1000").unwrap();
    let err = fixture.service().resize(&request).unwrap_err();

    assert!(matches!(err, ResizeError::InvalidContainer { .. }));
    assert!(fixture.output_files().is_empty());
    assert!(fixture.work_dir_is_empty());
}

#[test]
fn test_archive_without_document() {
    let fixture = Fixture::new();
    let source = fixture.path("Empty.twbx");
    write_packaged(&source, &[("Data/extract.hyper", b"hyper".as_slice())]);

    let request = ResizeRequest::new(&source, "Dash1", "2000", "1000").unwrap();
    let err = fixture.service().resize(&request).unwrap_err();

    assert!(matches!(err, ResizeError::MissingDocument(_)));
    assert!(fixture.output_files().is_empty());
    assert!(fixture.work_dir_is_empty());
}

#[test]
fn test_entry_escaping_archive_root_is_rejected() {
    let fixture = Fixture::new();
    let source = fixture.path("Evil.twbx");
    write_raw_zip(
        &source,
        &[
            (b"Evil.twb".as_slice(), WORKBOOK.as_bytes()),
            (b"../../escape.txt".as_slice(), b"gotcha".as_slice()),
        ],
    );

    let request = ResizeRequest::new(&source, "Dash1", "2000", "1000").unwrap();
    let err = fixture.service().resize(&request).unwrap_err();

    assert!(matches!(err, ResizeError::InvalidContainer { .. }));
    assert!(!fixture.path("escape.txt").exists());
    assert!(fixture.work_dir_is_empty());
}

#[test]
fn test_malformed_document() {
    let fixture = Fixture::new();
    let source = fixture.path("Bad.twb");
    fs::write(&source, "<workbook><dashboards>").unwrap();

    let request = ResizeRequest::new(&source, "Dash1", "2000", "1000").unwrap();
    let err = fixture.service().resize(&request).unwrap_err();

    assert!(matches!(err, ResizeError::MalformedDocument(_)));
    assert!(fixture.output_files().is_empty());
}

#[test]
fn test_list_dashboards() {
    let fixture = Fixture::new();
    let flat = fixture.path("Sales.twb");
    fs::write(&flat, WORKBOOK).unwrap();
    let packaged = fixture.path("Sales.twbx");
    write_packaged(&packaged, &[("Sales.twb", WORKBOOK.as_bytes())]);

    let service = fixture.service();
    assert_eq!(service.list_dashboards(&flat).unwrap(), vec!["Dash1", "Dash2"]);
    assert_eq!(service.list_dashboards(&packaged).unwrap(), vec!["Dash1", "Dash2"]);
    assert!(fixture.work_dir_is_empty());
}

#[test]
fn test_concurrent_runs_use_separate_workspaces() {
    let fixture = Fixture::new();
    let service = fixture.service();

    let sources: Vec<_> = (0..4)
        .map(|i| {
            let source = fixture.path(&format!("Book{}.twbx", i));
            write_packaged(&source, &[("Book.twb", WORKBOOK.as_bytes())]);
            source
        })
        .collect();

    std::thread::scope(|scope| {
        for source in &sources {
            let service = &service;
            scope.spawn(move || {
                let request = ResizeRequest::new(source, "Dash2", "500", "400").unwrap();
                service.resize(&request).unwrap();
            });
        }
    });

    assert_eq!(fixture.output_files().len(), 4);
    assert!(fixture.work_dir_is_empty());
}

#[test]
fn test_back_to_back_runs_keep_both_outputs() {
    let fixture = Fixture::new();
    let source = fixture.path("Book.twb");
    fs::write(&source, WORKBOOK).unwrap();
    let service = fixture.service();

    let first = service
        .resize(&ResizeRequest::new(&source, "Dash1", "2000", "1000").unwrap())
        .unwrap();
    let second = service
        .resize(&ResizeRequest::new(&source, "Dash2", "500", "400").unwrap())
        .unwrap();

    assert_ne!(first.output_path, second.output_path);
    assert_eq!(fixture.output_files().len(), 2);

    let first_text = fs::read_to_string(&first.output_path).unwrap();
    assert!(first_text.contains("maxwidth='2000'"));
    assert!(first_text.contains("<size maxheight='800' maxwidth='1000' />"));

    let second_text = fs::read_to_string(&second.output_path).unwrap();
    assert!(second_text.contains("maxwidth='500'"));
    assert!(second_text.contains("maxwidth='1366000'"));
}

#[test]
fn test_failure_after_extraction_cleans_up() {
    let fixture = Fixture::new();
    let source = fixture.path("Broken.twbx");
    let document = WORKBOOK.replace(
        "<zone h='100000' id='5' w='100000'",
        "<zone h='100000' id='5' w='wide'",
    );
    write_packaged(
        &source,
        &[
            ("Broken.twb", document.as_bytes()),
            ("Data/Files/café.csv", CSV_BYTES),
            ("Image/ロゴ.png", PNG_BYTES),
        ],
    );

    let request = ResizeRequest::new(&source, "Dash2", "500", "400").unwrap();
    let err = fixture.service().resize(&request).unwrap_err();

    assert!(matches!(err, ResizeError::MalformedDocument(_)));
    assert!(fixture.output_files().is_empty());
    assert!(fixture.work_dir_is_empty());
}

#[test]
fn test_listing_and_resizing_use_the_same_document() {
    let fixture = Fixture::new();
    let source = fixture.path("Multi.twbx");
    let first = "<workbook><dashboards><dashboard name='First'>\
<size maxheight='100' maxwidth='100' /></dashboard></dashboards></workbook>";
    let second = "<workbook><dashboards><dashboard name='Second'>\
<size maxheight='100' maxwidth='100' /></dashboard></dashboards></workbook>";
    // Archive order disagrees with name order
    write_packaged(
        &source,
        &[("b.twb", second.as_bytes()), ("a.twb", first.as_bytes())],
    );

    let service = fixture.service();
    assert_eq!(service.list_dashboards(&source).unwrap(), vec!["First"]);

    let request = ResizeRequest::new(&source, "First", "200", "200").unwrap();
    let report = service.resize(&request).unwrap();
    assert!(report.dashboard_found);
}
