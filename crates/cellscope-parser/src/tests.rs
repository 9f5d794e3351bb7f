use std::fs;
use std::io::{Cursor, Write};
use std::path::PathBuf;

use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::errors::ParserError;
use crate::model::{IngestOptions, RawValue, SourceFile, SourceFormat};
use crate::parse_source;

fn fixture(path: &str) -> Vec<u8> {
    let base = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let full_path = base.join("tests/data").join(path);
    fs::read(&full_path)
        .unwrap_or_else(|err| panic!("failed to read fixture {}: {}", full_path.display(), err))
}

fn parse_fixture(path: &str) -> crate::RawTable {
    let bytes = fixture(path);
    parse_source(&SourceFile::new(path, &bytes), &IngestOptions::default())
        .unwrap_or_else(|err| panic!("{path} failed to parse: {err}"))
}

#[test]
fn parses_arbin_csv() {
    let table = parse_fixture("arbin_cell07.csv");

    assert_eq!(table.format, SourceFormat::Delimited { delimiter: ',' });
    assert_eq!(table.format.as_str(), "csv");
    assert_eq!(table.header_row, Some(1));
    assert_eq!(table.headers[3], "Cycle_Index");
    assert_eq!(table.column_count(), 11);
    assert_eq!(table.rows.len(), 15);
    assert!(table.warnings.is_empty(), "unexpected warnings: {:?}", table.warnings);
}

#[test]
fn parses_maccor_export_with_preamble() {
    let table = parse_fixture("maccor_cell12.txt");

    assert_eq!(table.format, SourceFormat::Delimited { delimiter: '\t' });
    assert_eq!(table.header_row, Some(5));
    assert_eq!(table.preamble.len(), 4);
    assert!(table.preamble[3].starts_with("Procedure"));
    assert_eq!(table.headers[5], "Amp-hr");
    assert_eq!(table.rows.len(), 15);
    assert!(table
        .warnings
        .iter()
        .any(|warning| warning.contains("skipped 4 preamble line(s)")));
}

#[test]
fn maccor_line_endings_do_not_shift_the_header() {
    let crlf = String::from_utf8(fixture("maccor_cell12.txt")).unwrap();
    let lf = crlf.replace("\r\n", "\n");
    for text in [&crlf, &lf] {
        let table = parse_source(
            &SourceFile::new("maccor_cell12.txt", text.as_bytes()),
            &IngestOptions::default(),
        )
        .unwrap();
        assert_eq!(table.header_row, Some(5));
        assert_eq!(table.rows.len(), 15);
    }
}

#[test]
fn comma_in_maccor_preamble_keeps_tab_layout() {
    let text = String::from_utf8(fixture("maccor_cell12.txt"))
        .unwrap()
        .replace("Date of Test: 04/01/2024", "Date of Test: April 1, 2024");
    let table = parse_source(
        &SourceFile::new("maccor_cell12.txt", text.as_bytes()),
        &IngestOptions::default(),
    )
    .unwrap();

    assert_eq!(table.format, SourceFormat::Delimited { delimiter: '\t' });
    assert_eq!(table.header_row, Some(5));
    assert_eq!(table.headers[8], "Volts");
    assert_eq!(table.rows.len(), 15);
}

#[test]
fn parses_biologic_mpt_using_header_line_count() {
    let table = parse_fixture("biologic_cell03.mpt");

    assert_eq!(table.header_row, Some(6));
    assert_eq!(table.headers[3], "Ewe/V");
    assert_eq!(table.headers[5], "Q charge/discharge/mA.h");
    assert_eq!(table.rows.len(), 12);
    assert_eq!(
        table.rows[0].get(6).and_then(RawValue::as_f64),
        Some(1.0),
        "scientific notation cycle numbers should parse"
    );
}

#[test]
fn parses_neware_tsv() {
    let table = parse_fixture("cell_a1_steps.tsv");

    assert_eq!(table.format.as_str(), "tsv");
    assert_eq!(table.headers[2], "Step Type");
    assert_eq!(table.rows.len(), 10);
    assert_eq!(table.rows[3].get(2).and_then(RawValue::as_text), Some("CC_DChg"));
}

#[test]
fn parses_wrapped_json_records() {
    let table = parse_fixture("cycles.json");

    assert_eq!(table.format, SourceFormat::Json);
    assert_eq!(table.header_row, None);
    assert_eq!(
        table.headers,
        vec!["cycle", "step_type", "voltage", "current", "capacity", "temperature"]
    );
    assert_eq!(table.rows.len(), 12);
}

#[test]
fn parses_xml_records() {
    let table = parse_fixture("records.xml");

    assert_eq!(table.format, SourceFormat::Xml);
    assert_eq!(table.headers, vec!["cycle", "voltage", "current", "capacity"]);
    assert_eq!(table.rows.len(), 8);
}

#[test]
fn parses_spreadsheetml_workbook() {
    let table = parse_fixture("workbook.xml");

    assert_eq!(table.format, SourceFormat::SpreadsheetXml);
    assert_eq!(table.headers[3], "Capacity(mAh)");
    assert_eq!(table.rows.len(), 8);
}

#[test]
fn headerless_numeric_file_gets_positional_names() {
    let table = parse_fixture("headerless.csv");

    assert!(table.headerless);
    assert_eq!(table.header_row, None);
    assert_eq!(table.headers, vec!["column_1", "column_2", "column_3", "column_4"]);
    assert_eq!(table.rows.len(), 6);
    assert!(table
        .warnings
        .iter()
        .any(|warning| warning.contains("positional column names")));
}

fn build_xlsx() -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    let entries = [
        (
            "xl/workbook.xml",
            r#"<workbook><sheets><sheet name="Channel_1" sheetId="1"/></sheets></workbook>"#,
        ),
        (
            "xl/sharedStrings.xml",
            r#"<sst count="4"><si><t>Cycle_Index</t></si><si><t>Voltage(V)</t></si><si><t>Current(A)</t></si><si><t>Discharge_Capacity(Ah)</t></si></sst>"#,
        ),
        (
            "xl/worksheets/sheet1.xml",
            r#"<worksheet><sheetData>
                <row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c><c r="C1" t="s"><v>2</v></c><c r="D1" t="s"><v>3</v></c></row>
                <row r="2"><c r="A2"><v>1</v></c><c r="B2"><v>4.2</v></c><c r="C2"><v>-1.1</v></c><c r="D2"><v>0.5</v></c></row>
                <row r="3"><c r="A3"><v>1</v></c><c r="B3"><v>3.1</v></c><c r="C3"><v>-1.1</v></c><c r="D3"><v>2.4</v></c></row>
            </sheetData></worksheet>"#,
        ),
    ];
    for (name, body) in entries {
        writer.start_file(name, options).expect("start zip entry");
        writer.write_all(body.as_bytes()).expect("write zip entry");
    }
    writer.finish().expect("finish zip").into_inner()
}

#[test]
fn parses_xlsx_first_sheet() {
    let bytes = build_xlsx();
    let table = parse_source(
        &SourceFile::new("channel_1.xlsx", &bytes),
        &IngestOptions::default(),
    )
    .expect("xlsx parse failed");

    assert_eq!(table.format, SourceFormat::Xlsx);
    assert_eq!(
        table.headers,
        vec!["Cycle_Index", "Voltage(V)", "Current(A)", "Discharge_Capacity(Ah)"]
    );
    assert_eq!(table.rows.len(), 2);
    assert_eq!(table.rows[1].get(3).and_then(RawValue::as_f64), Some(2.4));
}

#[test]
fn strips_bom_and_keeps_decode_warning_first() {
    let mut bytes = b"\xEF\xBB\xBF".to_vec();
    bytes.extend_from_slice(&fixture("arbin_cell07.csv"));
    let table = parse_source(&SourceFile::new("bom.csv", &bytes), &IngestOptions::default())
        .expect("BOM csv parse failed");

    assert_eq!(table.headers[0], "Data_Point");
    assert!(table.warnings[0].contains("byte-order mark"));
}

#[test]
fn oversized_file_parses_with_warning() {
    let bytes = fixture("headerless.csv");
    let options = IngestOptions {
        max_file_bytes: 16,
        ..IngestOptions::default()
    };
    let table = parse_source(&SourceFile::new("headerless.csv", &bytes), &options)
        .expect("oversized parse failed");

    assert_eq!(table.rows.len(), 6);
    assert!(table.warnings.iter().any(|warning| warning.contains("byte limit")));
}

#[test]
fn empty_file_is_empty_data() {
    let result = parse_source(&SourceFile::new("empty.csv", b""), &IngestOptions::default());
    assert!(matches!(result, Err(ParserError::EmptyData { .. })));
}

#[test]
fn legacy_xls_is_unsupported() {
    let mut bytes = vec![0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
    bytes.extend_from_slice(&[0u8; 64]);
    let result = parse_source(&SourceFile::new("old.xls", &bytes), &IngestOptions::default());
    assert!(matches!(result, Err(ParserError::Unsupported { .. })));
}

#[test]
fn binary_noise_matches_no_parser() {
    let bytes: Vec<u8> = (0u8..=255).cycle().take(1024).collect();
    match parse_source(&SourceFile::new("noise.bin", &bytes), &IngestOptions::default()) {
        Err(ParserError::NoMatchingParser { attempts }) => {
            let names: Vec<&str> = attempts.iter().map(|attempt| attempt.parser).collect();
            assert_eq!(names, vec!["XLSX", "JSON", "XML", "DELIMITED"]);
        }
        other => panic!("expected NoMatchingParser, got {other:?}"),
    }
}
