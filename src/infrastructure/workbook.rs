//! Minimal xlsx reader: cell text, fill foreground colour and merge ranges per worksheet.

use crate::domain::classifier::FillColor;
use crate::domain::grid::{CellPosition, Grid, GridCell, MergeRange};
use crate::infrastructure::error::InfraError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Read, Seek};
use std::path::Path;
use tracing::debug;
use zip::ZipArchive;

const WORKBOOK_PART: &str = "xl/workbook.xml";
const WORKBOOK_RELS_PART: &str = "xl/_rels/workbook.xml.rels";
const SHARED_STRINGS_PART: &str = "xl/sharedStrings.xml";
const STYLES_PART: &str = "xl/styles.xml";

#[derive(Debug, Clone, PartialEq, Eq)]
struct SheetRef {
    name: String,
    relationship_id: String,
}

/// Fill colour per `cellXfs` index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct CellStyles {
    fills: Vec<FillColor>,
    xf_fill_ids: Vec<usize>,
}

impl CellStyles {
    fn fill_for(&self, style_index: Option<usize>) -> FillColor {
        style_index
            .and_then(|index| self.xf_fill_ids.get(index))
            .and_then(|fill_id| self.fills.get(*fill_id))
            .cloned()
            .unwrap_or_default()
    }
}

pub fn load_workbook(path: &Path) -> Result<Vec<Grid>, InfraError> {
    let bytes = fs::read(path)?;
    debug!(path = %path.display(), size = bytes.len(), "loading workbook");
    load_workbook_from_bytes(&bytes)
}

pub fn load_workbook_from_bytes(bytes: &[u8]) -> Result<Vec<Grid>, InfraError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;

    let workbook_xml = read_part(&mut archive, WORKBOOK_PART)?
        .ok_or_else(|| InfraError::Workbook(format!("missing {WORKBOOK_PART}")))?;
    let sheets = parse_sheet_refs(&workbook_xml)?;
    let targets = match read_part(&mut archive, WORKBOOK_RELS_PART)? {
        Some(xml) => parse_relationships(&xml)?,
        None => HashMap::new(),
    };
    let shared_strings = match read_part(&mut archive, SHARED_STRINGS_PART)? {
        Some(xml) => parse_shared_strings(&xml)?,
        None => Vec::new(),
    };
    let styles = match read_part(&mut archive, STYLES_PART)? {
        Some(xml) => parse_styles(&xml)?,
        None => CellStyles::default(),
    };

    let mut grids = Vec::with_capacity(sheets.len());
    for sheet in sheets {
        let Some(target) = targets.get(&sheet.relationship_id) else {
            return Err(InfraError::Workbook(format!(
                "sheet '{}' has no relationship target",
                sheet.name
            )));
        };
        let part = resolve_target(target);
        let xml = read_part(&mut archive, &part)?
            .ok_or_else(|| InfraError::Workbook(format!("missing worksheet part {part}")))?;
        let grid = parse_worksheet(&sheet.name, &xml, &shared_strings, &styles)?;
        debug!(sheet = grid.name(), merges = grid.merges().len(), rows = grid.max_row(), "parsed worksheet");
        grids.push(grid);
    }
    Ok(grids)
}

fn read_part<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<Option<String>, InfraError> {
    let mut file = match archive.by_name(name) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(error) => return Err(error.into()),
    };
    let mut xml = String::new();
    file.read_to_string(&mut xml)?;
    Ok(Some(xml))
}

fn resolve_target(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{target}"),
    }
}

fn attribute(element: &BytesStart<'_>, local: &[u8]) -> Result<Option<String>, InfraError> {
    for attr in element.attributes() {
        let attr = attr?;
        if attr.key.local_name().as_ref() == local {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn parse_sheet_refs(xml: &str) -> Result<Vec<SheetRef>, InfraError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut sheets = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                let name = attribute(&e, b"name")?.unwrap_or_default();
                let Some(relationship_id) = attribute(&e, b"id")? else {
                    return Err(InfraError::Workbook(format!("sheet '{name}' has no r:id")));
                };
                sheets.push(SheetRef { name, relationship_id });
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(sheets)
}

fn parse_relationships(xml: &str) -> Result<HashMap<String, String>, InfraError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut targets = HashMap::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                if let (Some(id), Some(target)) = (attribute(&e, b"Id")?, attribute(&e, b"Target")?) {
                    targets.insert(id, target);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(targets)
}

/// Visible text of each `<si>`: direct `<t>` plus rich-text runs, without phonetic runs.
fn parse_shared_strings(xml: &str) -> Result<Vec<String>, InfraError> {
    let mut reader = Reader::from_str(xml);
    let mut items = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == b"si" => current = Some(String::new()),
            Event::Start(e) if e.local_name().as_ref() == b"rPh" => {
                reader.read_to_end(e.name())?;
            }
            Event::Start(e) if e.local_name().as_ref() == b"t" => in_text = current.is_some(),
            Event::End(e) if e.local_name().as_ref() == b"t" => in_text = false,
            Event::Text(e) if in_text => {
                if let Some(text) = current.as_mut() {
                    text.push_str(&e.unescape()?);
                }
            }
            Event::CData(e) if in_text => {
                if let Some(text) = current.as_mut() {
                    text.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Event::End(e) if e.local_name().as_ref() == b"si" => {
                items.push(current.take().unwrap_or_default());
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(items)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StyleSection {
    Other,
    Fills,
    CellXfs,
}

fn fill_color(element: &BytesStart<'_>) -> Result<Option<FillColor>, InfraError> {
    if let Some(rgb) = attribute(element, b"rgb")? {
        return Ok(Some(FillColor::rgb(rgb)));
    }
    if let Some(theme) = attribute(element, b"theme")?.and_then(|value| value.parse().ok()) {
        return Ok(Some(FillColor::Theme(theme)));
    }
    Ok(attribute(element, b"indexed")?
        .and_then(|value| value.parse().ok())
        .map(FillColor::Indexed))
}

fn parse_styles(xml: &str) -> Result<CellStyles, InfraError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut styles = CellStyles::default();
    let mut section = StyleSection::Other;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"fills" => section = StyleSection::Fills,
                b"cellXfs" => section = StyleSection::CellXfs,
                b"fill" if section == StyleSection::Fills => styles.fills.push(FillColor::default()),
                b"fgColor" if section == StyleSection::Fills => apply_fg_color(&mut styles, &e)?,
                b"xf" if section == StyleSection::CellXfs => push_xf(&mut styles, &e)?,
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"fill" if section == StyleSection::Fills => styles.fills.push(FillColor::default()),
                b"fgColor" if section == StyleSection::Fills => apply_fg_color(&mut styles, &e)?,
                b"xf" if section == StyleSection::CellXfs => push_xf(&mut styles, &e)?,
                _ => {}
            },
            Event::End(e) => {
                if matches!(e.local_name().as_ref(), b"fills" | b"cellXfs") {
                    section = StyleSection::Other;
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(styles)
}

fn apply_fg_color(styles: &mut CellStyles, element: &BytesStart<'_>) -> Result<(), InfraError> {
    if let (Some(fill), Some(color)) = (styles.fills.last_mut(), fill_color(element)?) {
        *fill = color;
    }
    Ok(())
}

fn push_xf(styles: &mut CellStyles, element: &BytesStart<'_>) -> Result<(), InfraError> {
    let fill_id = attribute(element, b"fillId")?
        .and_then(|value| value.parse().ok())
        .unwrap_or(0);
    styles.xf_fill_ids.push(fill_id);
    Ok(())
}

#[derive(Debug, Default)]
struct PendingCell {
    position: Option<CellPosition>,
    style: Option<usize>,
    kind: Option<String>,
    raw: Option<String>,
    inline: Option<String>,
}

impl PendingCell {
    fn value(self, shared_strings: &[String]) -> Option<String> {
        let value = match self.kind.as_deref() {
            Some("s") => self
                .raw
                .and_then(|index| index.trim().parse::<usize>().ok())
                .and_then(|index| shared_strings.get(index).cloned()),
            Some("inlineStr") => self.inline,
            _ => self.raw,
        };
        value.filter(|value| !value.is_empty())
    }
}

fn parse_worksheet(
    name: &str,
    xml: &str,
    shared_strings: &[String],
    styles: &CellStyles,
) -> Result<Grid, InfraError> {
    let mut reader = Reader::from_str(xml);
    let mut grid = Grid::new(name);
    let mut row = 0u32;
    let mut previous_column = 0u32;
    let mut pending: Option<PendingCell> = None;
    let mut in_value = false;
    let mut in_inline_text = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"row" => {
                row = attribute(&e, b"r")?
                    .and_then(|value| value.parse().ok())
                    .unwrap_or(row + 1);
                previous_column = 0;
            }
            Event::Start(e) if e.local_name().as_ref() == b"c" => {
                pending = Some(start_cell(&e, row, &mut previous_column)?);
            }
            Event::Empty(e) if e.local_name().as_ref() == b"c" => {
                let cell = start_cell(&e, row, &mut previous_column)?;
                finish_cell(&mut grid, cell, shared_strings, styles);
            }
            Event::Start(e) if e.local_name().as_ref() == b"v" => in_value = pending.is_some(),
            Event::End(e) if e.local_name().as_ref() == b"v" => in_value = false,
            Event::Start(e) if e.local_name().as_ref() == b"t" => in_inline_text = pending.is_some(),
            Event::End(e) if e.local_name().as_ref() == b"t" => in_inline_text = false,
            Event::Text(e) if in_value || in_inline_text => {
                if let Some(cell) = pending.as_mut() {
                    let text = e.unescape()?;
                    let target = if in_value { &mut cell.raw } else { &mut cell.inline };
                    target.get_or_insert_with(String::new).push_str(&text);
                }
            }
            Event::End(e) if e.local_name().as_ref() == b"c" => {
                if let Some(cell) = pending.take() {
                    finish_cell(&mut grid, cell, shared_strings, styles);
                }
            }
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"mergeCell" => {
                if let Some(reference) = attribute(&e, b"ref")? {
                    let range = MergeRange::from_a1(&reference).ok_or_else(|| {
                        InfraError::Workbook(format!("invalid merge cell reference: {reference}"))
                    })?;
                    grid.add_merge(range);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(grid)
}

fn start_cell(element: &BytesStart<'_>, row: u32, previous_column: &mut u32) -> Result<PendingCell, InfraError> {
    let position = match attribute(element, b"r")? {
        Some(reference) => CellPosition::from_a1(&reference),
        None if row > 0 => Some(CellPosition::new(row, *previous_column + 1)),
        None => None,
    };
    if let Some(position) = position {
        *previous_column = position.column;
    }
    Ok(PendingCell {
        position,
        style: attribute(element, b"s")?.and_then(|value| value.parse().ok()),
        kind: attribute(element, b"t")?,
        ..PendingCell::default()
    })
}

fn finish_cell(grid: &mut Grid, cell: PendingCell, shared_strings: &[String], styles: &CellStyles) {
    let Some(position) = cell.position else {
        return;
    };
    let fill = styles.fill_for(cell.style);
    let value = cell.value(shared_strings);
    grid.insert_cell(position, GridCell { value, fill });
}
