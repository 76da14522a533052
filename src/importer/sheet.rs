//! Spreadsheet parsing for user imports.
//!
//! Reads the first sheet of a workbook, treats its first row as the header,
//! and turns every following row into an [`ImportRow`].

use std::collections::HashMap;
use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};

use super::ImportError;

/// Columns every import file must declare. Extra columns are ignored.
pub const REQUIRED_COLUMNS: [&str; 8] = [
    "name",
    "surname",
    "email",
    "phone",
    "age",
    "role_id",
    "country_id",
    "secret",
];

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// Workbook formats accepted for import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetFormat {
    /// .xlsx, .xlsm
    Xlsx,
    /// .xlsb
    Xlsb,
    /// .xls (BIFF, OLE container)
    Xls,
    /// .ods
    Ods,
}

/// Detect the workbook format from the file extension, confirmed by the
/// container signature. Anything else is unsupported.
pub fn detect_format(filename: &str, bytes: &[u8]) -> Option<SheetFormat> {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();

    let format = match ext.as_str() {
        "xlsx" | "xlsm" => SheetFormat::Xlsx,
        "xlsb" => SheetFormat::Xlsb,
        "xls" => SheetFormat::Xls,
        "ods" => SheetFormat::Ods,
        _ => return None,
    };

    let signature_ok = match format {
        SheetFormat::Xls => bytes.starts_with(OLE_MAGIC),
        SheetFormat::Xlsx | SheetFormat::Xlsb | SheetFormat::Ods => bytes.starts_with(ZIP_MAGIC),
    };
    signature_ok.then_some(format)
}

/// One data row of an import file. Absent cells are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportRow {
    /// 1-based position among data rows (the header is not counted).
    pub row_number: usize,
    pub name: String,
    pub surname: String,
    pub email: String,
    pub phone: String,
    pub age: String,
    pub role_id: String,
    pub country_id: String,
    pub secret: String,
}

/// Column positions of the required fields within the header.
struct ColumnMap {
    name: usize,
    surname: usize,
    email: usize,
    phone: usize,
    age: usize,
    role_id: usize,
    country_id: usize,
    secret: usize,
}

impl ColumnMap {
    /// Locate every required column, or report all that are missing.
    fn from_header(header: &[String]) -> Result<Self, ImportError> {
        let mut positions: HashMap<&str, usize> = HashMap::new();
        for (idx, name) in header.iter().enumerate() {
            positions.entry(name.as_str()).or_insert(idx);
        }

        let missing: Vec<String> = REQUIRED_COLUMNS
            .iter()
            .filter(|c| !positions.contains_key(*c))
            .map(|c| c.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ImportError::MissingColumns(missing));
        }

        let at = |column: &str| positions.get(column).copied().unwrap_or_default();
        Ok(Self {
            name: at("name"),
            surname: at("surname"),
            email: at("email"),
            phone: at("phone"),
            age: at("age"),
            role_id: at("role_id"),
            country_id: at("country_id"),
            secret: at("secret"),
        })
    }

    fn build_row(&self, row_number: usize, cells: &[Data]) -> ImportRow {
        let cell = |idx: usize| cells.get(idx).map(cell_to_string).unwrap_or_default();
        ImportRow {
            row_number,
            name: cell(self.name),
            surname: cell(self.surname),
            email: cell(self.email),
            phone: cell(self.phone),
            age: cell(self.age),
            role_id: cell(self.role_id),
            country_id: cell(self.country_id),
            secret: cell(self.secret),
        }
    }
}

/// Parse an uploaded workbook into rows.
///
/// Fails with [`ImportError::UnsupportedFormat`] when the bytes are not a
/// readable workbook and [`ImportError::MissingColumns`] when the header
/// lacks required columns. An empty first sheet lacks all of them.
pub fn parse_workbook(filename: &str, bytes: &[u8]) -> Result<Vec<ImportRow>, ImportError> {
    if detect_format(filename, bytes).is_none() {
        return Err(ImportError::UnsupportedFormat(filename.to_string()));
    }

    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| ImportError::UnsupportedFormat(format!("{}: {}", filename, e)))?;

    let first_sheet = workbook.sheet_names().first().cloned();
    let Some(sheet_name) = first_sheet else {
        return Err(ImportError::MissingColumns(all_required()));
    };
    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| ImportError::UnsupportedFormat(format!("{}: {}", filename, e)))?;

    let mut rows = range.rows();
    let header: Vec<String> = match rows.next() {
        Some(cells) => cells.iter().map(|c| cell_to_string(c).trim().to_string()).collect(),
        None => return Err(ImportError::MissingColumns(all_required())),
    };
    let columns = ColumnMap::from_header(&header)?;

    // Blank rows are skipped; row numbers still follow sheet position.
    Ok(rows
        .enumerate()
        .filter(|(_, cells)| cells.iter().any(|c| !cell_to_string(c).trim().is_empty()))
        .map(|(idx, cells)| columns.build_row(idx + 1, cells))
        .collect())
}

fn all_required() -> Vec<String> {
    REQUIRED_COLUMNS.iter().map(|c| c.to_string()).collect()
}

/// Render a cell as text. Whole-number floats drop their fraction so ids and
/// phone numbers typed as numbers read back as written.
fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(n) => n.to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                format!("{}", *f as i64)
            } else {
                format!("{}", f)
            }
        }
        Data::Bool(b) => b.to_string(),
        Data::Error(e) => format!("#ERR({:?})", e),
        Data::DateTime(dt) => format!("{}", dt),
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
    }
}
