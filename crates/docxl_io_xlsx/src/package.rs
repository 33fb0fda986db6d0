//! Package post-processing: rewrites the saved xlsx container to add parts the
//! encoder cannot produce (pivot tables, workbook protection, split panes and
//! the extended core properties).

use std::collections::{BTreeMap, BTreeSet};
use std::io::{Cursor, Read, Write};

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::conf::N_PROTECTION_SPIN_COUNT;
use crate::error::{Result, XlsxBuildError};
use crate::pivot::SpecPivotParts;
use crate::spec::{
    EnumProtectionAlgorithm, SpecDocProperties, SpecWorkbookProtection, SpecXlsxBuildReport,
};
use crate::util::{hash_password_iterated, hash_password_xor};

const C_PART_WORKBOOK: &str = "xl/workbook.xml";
const C_PART_WORKBOOK_RELS: &str = "xl/_rels/workbook.xml.rels";
const C_PART_CONTENT_TYPES: &str = "[Content_Types].xml";
const C_PART_CORE: &str = "docProps/core.xml";

const C_NS_PACKAGE_RELS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
const C_REL_PIVOT_TABLE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/pivotTable";
const C_REL_PIVOT_CACHE_DEFINITION: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/pivotCacheDefinition";
const C_REL_PIVOT_CACHE_RECORDS: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/pivotCacheRecords";
const C_CT_PIVOT_TABLE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.pivotTable+xml";
const C_CT_PIVOT_CACHE_DEFINITION: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.pivotCacheDefinition+xml";
const C_CT_PIVOT_CACHE_RECORDS: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.pivotCacheRecords+xml";

////////////////////////////////////////////////////////////////////////////////
// #region PackagePlan

/// Split pane for one sheet, in the units Excel stores (`xSplit`/`ySplit`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecSplitPane {
    pub sheet_name: String,
    pub x_split: i64,
    pub y_split: i64,
    pub top_left_cell: String,
    pub active_pane: String,
}

/// Everything queued for the package pass during one build.
#[derive(Debug, Clone, Default)]
pub struct SpecPackagePlan {
    pub l_pivots: Vec<SpecPivotParts>,
    pub protection: Option<SpecWorkbookProtection>,
    pub l_split_panes: Vec<SpecSplitPane>,
    pub doc_props: Option<SpecDocProperties>,
}

impl SpecPackagePlan {
    pub fn is_empty(&self) -> bool {
        self.l_pivots.is_empty()
            && self.protection.is_none()
            && self.l_split_panes.is_empty()
            && self.doc_props.is_none()
    }
}

#[derive(Debug, Clone)]
struct SpecRelationship {
    id: String,
    rel_type: &'static str,
    target: String,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Rewrite

/// Rewrite the saved package according to `plan`.
///
/// Protection and split pane failures are reported as warnings; container and
/// XML failures are fatal.
pub fn rewrite_package(
    bytes: Vec<u8>,
    plan: &SpecPackagePlan,
    report: &mut SpecXlsxBuildReport,
) -> Result<Vec<u8>> {
    if plan.is_empty() {
        return Ok(bytes);
    }

    let mut dict_parts = read_parts(&bytes)?;
    let l_order: Vec<String> = dict_parts.keys().cloned().collect();
    let dict_sheet_paths = derive_sheet_paths(&dict_parts)?;

    let protection = plan
        .protection
        .as_ref()
        .and_then(|spec| derive_protection_element(spec, report));

    let mut l_pivot_caches: Vec<(usize, String)> = Vec::new();
    let mut l_workbook_rels: Vec<SpecRelationship> = Vec::new();
    let mut l_overrides: Vec<(String, &'static str)> = Vec::new();
    let mut n_workbook_rel = derive_next_rel_id(dict_parts.get(C_PART_WORKBOOK_RELS))?;

    for parts in &plan.l_pivots {
        let Some(path_sheet) = dict_sheet_paths.get(&parts.sheet_name) else {
            report.warn(format!(
                "pivot table {}: target sheet `{}` not found in package",
                parts.n_index, parts.sheet_name
            ));
            continue;
        };
        let n = parts.n_index;
        let path_definition = format!("xl/pivotCache/pivotCacheDefinition{n}.xml");
        let path_records = format!("xl/pivotCache/pivotCacheRecords{n}.xml");
        let path_table = format!("xl/pivotTables/pivotTable{n}.xml");

        dict_parts.insert(path_definition.clone(), parts.cache_definition_xml.clone().into_bytes());
        dict_parts.insert(path_records.clone(), parts.cache_records_xml.clone().into_bytes());
        dict_parts.insert(path_table.clone(), parts.pivot_table_xml.clone().into_bytes());
        dict_parts.insert(
            format!("xl/pivotCache/_rels/pivotCacheDefinition{n}.xml.rels"),
            append_relationships(
                None,
                &[SpecRelationship {
                    id: "rId1".to_string(),
                    rel_type: C_REL_PIVOT_CACHE_RECORDS,
                    target: format!("pivotCacheRecords{n}.xml"),
                }],
            )?,
        );
        dict_parts.insert(
            format!("xl/pivotTables/_rels/pivotTable{n}.xml.rels"),
            append_relationships(
                None,
                &[SpecRelationship {
                    id: "rId1".to_string(),
                    rel_type: C_REL_PIVOT_CACHE_DEFINITION,
                    target: format!("../pivotCache/pivotCacheDefinition{n}.xml"),
                }],
            )?,
        );

        let path_sheet_rels = derive_rels_path(path_sheet);
        let n_sheet_rel = derive_next_rel_id(dict_parts.get(&path_sheet_rels))?;
        let sheet_rels = append_relationships(
            dict_parts.get(&path_sheet_rels).map(Vec::as_slice),
            &[SpecRelationship {
                id: format!("rId{n_sheet_rel}"),
                rel_type: C_REL_PIVOT_TABLE,
                target: format!("../pivotTables/pivotTable{n}.xml"),
            }],
        )?;
        dict_parts.insert(path_sheet_rels, sheet_rels);

        let id_workbook_rel = format!("rId{n_workbook_rel}");
        n_workbook_rel += 1;
        l_workbook_rels.push(SpecRelationship {
            id: id_workbook_rel.clone(),
            rel_type: C_REL_PIVOT_CACHE_DEFINITION,
            target: format!("pivotCache/pivotCacheDefinition{n}.xml"),
        });
        l_pivot_caches.push((n, id_workbook_rel));
        l_overrides.push((format!("/{path_definition}"), C_CT_PIVOT_CACHE_DEFINITION));
        l_overrides.push((format!("/{path_records}"), C_CT_PIVOT_CACHE_RECORDS));
        l_overrides.push((format!("/{path_table}"), C_CT_PIVOT_TABLE));
    }

    if !l_workbook_rels.is_empty() {
        let rels = append_relationships(
            dict_parts.get(C_PART_WORKBOOK_RELS).map(Vec::as_slice),
            &l_workbook_rels,
        )?;
        dict_parts.insert(C_PART_WORKBOOK_RELS.to_string(), rels);
    }
    if !l_overrides.is_empty() {
        let content_types = dict_parts
            .get(C_PART_CONTENT_TYPES)
            .ok_or_else(|| XlsxBuildError::Package(format!("missing {C_PART_CONTENT_TYPES}")))?;
        let content_types = append_overrides(content_types, &l_overrides)?;
        dict_parts.insert(C_PART_CONTENT_TYPES.to_string(), content_types);
    }
    if protection.is_some() || !l_pivot_caches.is_empty() {
        let workbook = dict_parts
            .get(C_PART_WORKBOOK)
            .ok_or_else(|| XlsxBuildError::Package(format!("missing {C_PART_WORKBOOK}")))?;
        let workbook = rewrite_workbook(workbook, protection.as_ref(), &l_pivot_caches)?;
        dict_parts.insert(C_PART_WORKBOOK.to_string(), workbook);
    }

    for split_pane in &plan.l_split_panes {
        let Some(path_sheet) = dict_sheet_paths.get(&split_pane.sheet_name) else {
            report.warn(format!(
                "split panes: sheet `{}` not found in package",
                split_pane.sheet_name
            ));
            continue;
        };
        let Some(sheet_xml) = dict_parts.get(path_sheet) else {
            continue;
        };
        let sheet_xml = rewrite_sheet_pane(sheet_xml, split_pane)?;
        dict_parts.insert(path_sheet.clone(), sheet_xml);
    }

    if let Some(doc_props) = &plan.doc_props
        && let Some(core) = dict_parts.get(C_PART_CORE)
    {
        let core = rewrite_core_properties(core, doc_props)?;
        dict_parts.insert(C_PART_CORE.to_string(), core);
    }

    write_parts(&l_order, dict_parts)
}

fn read_parts(bytes: &[u8]) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut dict_parts = BTreeMap::new();
    for idx in 0..archive.len() {
        let mut file = archive.by_index(idx)?;
        let name = file.name().to_string();
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;
        dict_parts.insert(name, buffer);
    }
    Ok(dict_parts)
}

/// Write parts back; original parts keep their order, new parts follow.
fn write_parts(l_order: &[String], mut dict_parts: BTreeMap<String, Vec<u8>>) -> Result<Vec<u8>> {
    let options = FileOptions::<()>::default().compression_method(CompressionMethod::Deflated);
    let mut zip_writer = ZipWriter::new(Cursor::new(Vec::new()));

    let mut l_entries: Vec<(String, Vec<u8>)> = Vec::with_capacity(dict_parts.len());
    for name in l_order {
        if let Some(buffer) = dict_parts.remove(name) {
            l_entries.push((name.clone(), buffer));
        }
    }
    l_entries.extend(dict_parts);

    for (name, buffer) in l_entries {
        zip_writer.start_file(name.as_str(), options)?;
        zip_writer.write_all(&buffer)?;
    }
    Ok(zip_writer.finish()?.into_inner())
}

fn read_attribute(element: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>> {
    for attr in element.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        if attr.key.as_ref() == key {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

/// Map sheet names to their part paths through the workbook relationships.
fn derive_sheet_paths(dict_parts: &BTreeMap<String, Vec<u8>>) -> Result<BTreeMap<String, String>> {
    let workbook = dict_parts
        .get(C_PART_WORKBOOK)
        .ok_or_else(|| XlsxBuildError::Package(format!("missing {C_PART_WORKBOOK}")))?;
    let rels = dict_parts
        .get(C_PART_WORKBOOK_RELS)
        .ok_or_else(|| XlsxBuildError::Package(format!("missing {C_PART_WORKBOOK_RELS}")))?;

    let mut dict_targets = BTreeMap::new();
    let mut reader = Reader::from_reader(rels.as_slice());
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.name().as_ref() == b"Relationship" => {
                if let (Some(id), Some(target)) =
                    (read_attribute(&e, b"Id")?, read_attribute(&e, b"Target")?)
                {
                    dict_targets.insert(id, target);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    let mut dict_paths = BTreeMap::new();
    let mut reader = Reader::from_reader(workbook.as_slice());
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.name().as_ref() == b"sheet" => {
                let name = read_attribute(&e, b"name")?;
                let id = read_attribute(&e, b"r:id")?;
                if let (Some(name), Some(id)) = (name, id)
                    && let Some(target) = dict_targets.get(&id)
                {
                    let path = match target.strip_prefix('/') {
                        Some(path) => path.to_string(),
                        None => format!("xl/{target}"),
                    };
                    dict_paths.insert(name, path);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(dict_paths)
}

/// `xl/worksheets/sheet1.xml` -> `xl/worksheets/_rels/sheet1.xml.rels`.
fn derive_rels_path(path_part: &str) -> String {
    match path_part.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/_rels/{file}.rels"),
        None => format!("_rels/{path_part}.rels"),
    }
}

fn derive_next_rel_id(rels: Option<&Vec<u8>>) -> Result<usize> {
    let Some(rels) = rels else {
        return Ok(1);
    };
    let mut n_max = 0;
    let mut reader = Reader::from_reader(rels.as_slice());
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.name().as_ref() == b"Relationship" => {
                let n_id = read_attribute(&e, b"Id")?
                    .and_then(|id| id.strip_prefix("rId").and_then(|val| val.parse::<usize>().ok()))
                    .unwrap_or(0);
                n_max = n_max.max(n_id);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(n_max + 1)
}

fn write_relationship(writer: &mut Writer<Cursor<Vec<u8>>>, rel: &SpecRelationship) -> Result<()> {
    let element = BytesStart::new("Relationship").with_attributes([
        ("Id", rel.id.as_str()),
        ("Type", rel.rel_type),
        ("Target", rel.target.as_str()),
    ]);
    writer.write_event(Event::Empty(element))?;
    Ok(())
}

/// Append relationships to an existing rels part, or create a new one.
fn append_relationships(rels: Option<&[u8]>, l_new: &[SpecRelationship]) -> Result<Vec<u8>> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let Some(rels) = rels else {
        writer
            .get_mut()
            .write_all(br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#)?;
        writer.get_mut().write_all(b"\n")?;
        writer.write_event(Event::Start(
            BytesStart::new("Relationships").with_attributes([("xmlns", C_NS_PACKAGE_RELS)]),
        ))?;
        for rel in l_new {
            write_relationship(&mut writer, rel)?;
        }
        writer.write_event(Event::End(BytesEnd::new("Relationships")))?;
        return Ok(writer.into_inner().into_inner());
    };

    let mut reader = Reader::from_reader(rels);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::End(e) if e.name().as_ref() == b"Relationships" => {
                for rel in l_new {
                    write_relationship(&mut writer, rel)?;
                }
                writer.write_event(Event::End(e))?;
            }
            Event::Eof => break,
            e => writer.write_event(e)?,
        }
        buf.clear();
    }
    Ok(writer.into_inner().into_inner())
}

fn append_overrides(content_types: &[u8], l_overrides: &[(String, &'static str)]) -> Result<Vec<u8>> {
    let mut reader = Reader::from_reader(content_types);
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::End(e) if e.name().as_ref() == b"Types" => {
                for (part_name, content_type) in l_overrides {
                    let element = BytesStart::new("Override").with_attributes([
                        ("PartName", part_name.as_str()),
                        ("ContentType", *content_type),
                    ]);
                    writer.write_event(Event::Empty(element))?;
                }
                writer.write_event(Event::End(e))?;
            }
            Event::Eof => break,
            e => writer.write_event(e)?,
        }
        buf.clear();
    }
    Ok(writer.into_inner().into_inner())
}

fn write_pivot_caches(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    l_pivot_caches: &[(usize, String)],
) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new("pivotCaches")))?;
    for (n_cache_id, id_rel) in l_pivot_caches {
        let n_cache_id = n_cache_id.to_string();
        let element = BytesStart::new("pivotCache")
            .with_attributes([("cacheId", n_cache_id.as_str()), ("r:id", id_rel.as_str())]);
        writer.write_event(Event::Empty(element))?;
    }
    writer.write_event(Event::End(BytesEnd::new("pivotCaches")))?;
    Ok(())
}

/// Insert `<workbookProtection>` before `<bookViews>` and `<pivotCaches>`
/// before `<extLst>` or the end of the workbook.
fn rewrite_workbook(
    workbook: &[u8],
    protection: Option<&BytesStart<'static>>,
    l_pivot_caches: &[(usize, String)],
) -> Result<Vec<u8>> {
    let mut reader = Reader::from_reader(workbook);
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let mut buf = Vec::new();
    let mut n_skip_depth = 0usize;
    let mut if_caches_written = l_pivot_caches.is_empty();

    loop {
        let event = reader.read_event_into(&mut buf)?;
        if n_skip_depth > 0 {
            match event {
                Event::Start(_) => n_skip_depth += 1,
                Event::End(_) => n_skip_depth -= 1,
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
            continue;
        }
        match event {
            Event::Start(e) if e.name().as_ref() == b"workbookProtection" && protection.is_some() => {
                n_skip_depth = 1;
            }
            Event::Empty(e) if e.name().as_ref() == b"workbookProtection" && protection.is_some() => {}
            Event::Start(e) if e.name().as_ref() == b"bookViews" => {
                if let Some(element) = protection {
                    writer.write_event(Event::Empty(element.borrow()))?;
                }
                writer.write_event(Event::Start(e))?;
            }
            Event::Empty(e) if e.name().as_ref() == b"bookViews" => {
                if let Some(element) = protection {
                    writer.write_event(Event::Empty(element.borrow()))?;
                }
                writer.write_event(Event::Empty(e))?;
            }
            Event::Start(e) if e.name().as_ref() == b"extLst" && !if_caches_written => {
                write_pivot_caches(&mut writer, l_pivot_caches)?;
                if_caches_written = true;
                writer.write_event(Event::Start(e))?;
            }
            Event::End(e) if e.name().as_ref() == b"workbook" => {
                if !if_caches_written {
                    write_pivot_caches(&mut writer, l_pivot_caches)?;
                    if_caches_written = true;
                }
                writer.write_event(Event::End(e))?;
            }
            Event::Eof => break,
            e => writer.write_event(e)?,
        }
        buf.clear();
    }
    Ok(writer.into_inner().into_inner())
}

/// Replace the first sheet view's pane with a split pane.
fn rewrite_sheet_pane(sheet_xml: &[u8], split_pane: &SpecSplitPane) -> Result<Vec<u8>> {
    let x_split = split_pane.x_split.to_string();
    let y_split = split_pane.y_split.to_string();
    let active_pane = if split_pane.active_pane.is_empty() {
        "bottomRight"
    } else {
        split_pane.active_pane.as_str()
    };
    let mut pane = BytesStart::new("pane");
    if split_pane.x_split > 0 {
        pane.push_attribute(("xSplit", x_split.as_str()));
    }
    if split_pane.y_split > 0 {
        pane.push_attribute(("ySplit", y_split.as_str()));
    }
    if !split_pane.top_left_cell.is_empty() {
        pane.push_attribute(("topLeftCell", split_pane.top_left_cell.as_str()));
    }
    pane.push_attribute(("activePane", active_pane));
    pane.push_attribute(("state", "split"));

    let mut reader = Reader::from_reader(sheet_xml);
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let mut buf = Vec::new();
    let mut if_done = false;
    let mut if_in_view = false;
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.name().as_ref() == b"sheetView" && !if_done => {
                writer.write_event(Event::Start(e))?;
                writer.write_event(Event::Empty(pane.borrow()))?;
                if_done = true;
                if_in_view = true;
            }
            Event::Empty(e) if e.name().as_ref() == b"sheetView" && !if_done => {
                writer.write_event(Event::Start(e.borrow()))?;
                writer.write_event(Event::Empty(pane.borrow()))?;
                writer.write_event(Event::End(e.to_end()))?;
                if_done = true;
            }
            Event::Empty(e) if e.name().as_ref() == b"pane" && if_in_view => {}
            Event::End(e) if e.name().as_ref() == b"sheetView" => {
                if_in_view = false;
                writer.write_event(Event::End(e))?;
            }
            Event::Eof => break,
            e => writer.write_event(e)?,
        }
        buf.clear();
    }
    Ok(writer.into_inner().into_inner())
}

/// Core property elements the encoder does not write, as `(qname, value)`.
pub fn derive_core_property_elements(doc_props: &SpecDocProperties) -> Vec<(&'static str, &str)> {
    [
        ("cp:lastModifiedBy", doc_props.last_modified_by.as_str()),
        ("dc:language", doc_props.language.as_str()),
        ("dc:identifier", doc_props.identifier.as_str()),
        ("cp:revision", doc_props.revision.as_str()),
        ("cp:version", doc_props.version.as_str()),
        ("dcterms:created", doc_props.created.as_str()),
        ("dcterms:modified", doc_props.modified.as_str()),
    ]
    .into_iter()
    .filter(|(_, value)| !value.is_empty())
    .collect()
}

fn rewrite_core_properties(core: &[u8], doc_props: &SpecDocProperties) -> Result<Vec<u8>> {
    let l_elements = derive_core_property_elements(doc_props);
    if l_elements.is_empty() {
        return Ok(core.to_vec());
    }
    let set_names: BTreeSet<&[u8]> = l_elements.iter().map(|(name, _)| name.as_bytes()).collect();

    let mut reader = Reader::from_reader(core);
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let mut buf = Vec::new();
    let mut if_skipping = false;
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if set_names.contains(e.name().as_ref()) => if_skipping = true,
            Event::End(e) if if_skipping && set_names.contains(e.name().as_ref()) => {
                if_skipping = false;
            }
            Event::Empty(e) if set_names.contains(e.name().as_ref()) => {}
            Event::End(e) if e.name().as_ref() == b"cp:coreProperties" => {
                for (name, value) in &l_elements {
                    let mut element = BytesStart::new(*name);
                    if name.starts_with("dcterms:") {
                        element.push_attribute(("xsi:type", "dcterms:W3CDTF"));
                    }
                    writer.write_event(Event::Start(element))?;
                    writer.write_event(Event::Text(BytesText::new(value)))?;
                    writer.write_event(Event::End(BytesEnd::new(*name)))?;
                }
                writer.write_event(Event::End(e))?;
            }
            Event::Eof => break,
            _ if if_skipping => {}
            e => writer.write_event(e)?,
        }
        buf.clear();
    }
    Ok(writer.into_inner().into_inner())
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region WorkbookProtection

/// Build the `<workbookProtection>` element; unsupported algorithms are skipped
/// with a warning.
pub fn derive_protection_element(
    spec: &SpecWorkbookProtection,
    report: &mut SpecXlsxBuildReport,
) -> Option<BytesStart<'static>> {
    let Some(algorithm) = EnumProtectionAlgorithm::parse(&spec.algorithm) else {
        report.warn(format!(
            "protection: unknown algorithm `{}`, protection skipped",
            spec.algorithm
        ));
        return None;
    };

    let mut element = BytesStart::new("workbookProtection");
    if !spec.password.is_empty() {
        match algorithm {
            EnumProtectionAlgorithm::Xor => {
                let hash = hash_password_xor(&spec.password);
                element.push_attribute(("workbookPassword", hash.as_str()));
            }
            _ => {
                let Some((hash, salt)) =
                    hash_password_iterated(algorithm, &spec.password, N_PROTECTION_SPIN_COUNT)
                else {
                    report.warn(format!(
                        "protection: algorithm {} is not supported, protection skipped",
                        algorithm.as_str()
                    ));
                    return None;
                };
                let spin_count = N_PROTECTION_SPIN_COUNT.to_string();
                element.push_attribute(("workbookAlgorithmName", algorithm.as_str()));
                element.push_attribute(("workbookHashValue", hash.as_str()));
                element.push_attribute(("workbookSaltValue", salt.as_str()));
                element.push_attribute(("workbookSpinCount", spin_count.as_str()));
            }
        }
    }
    if spec.lock_structure {
        element.push_attribute(("lockStructure", "1"));
    }
    if spec.lock_windows {
        element.push_attribute(("lockWindows", "1"));
    }
    Some(element)
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn derive_text(bytes: Vec<u8>) -> String {
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_derive_rels_path() {
        assert_eq!(
            derive_rels_path("xl/worksheets/sheet2.xml"),
            "xl/worksheets/_rels/sheet2.xml.rels"
        );
    }

    #[test]
    fn test_append_relationships_creates_and_extends() {
        let rel = SpecRelationship {
            id: "rId1".to_string(),
            rel_type: C_REL_PIVOT_TABLE,
            target: "../pivotTables/pivotTable1.xml".to_string(),
        };
        let created = append_relationships(None, std::slice::from_ref(&rel)).unwrap();
        let text = derive_text(created.clone());
        assert!(text.contains(r#"<Relationship Id="rId1""#));
        assert_eq!(derive_next_rel_id(Some(&created)).unwrap(), 2);

        let extended = append_relationships(
            Some(&created),
            &[SpecRelationship {
                id: "rId2".to_string(),
                ..rel
            }],
        )
        .unwrap();
        assert_eq!(derive_next_rel_id(Some(&extended)).unwrap(), 3);
    }

    #[test]
    fn test_rewrite_workbook_inserts_protection_and_caches() {
        let workbook = br#"<?xml version="1.0"?><workbook xmlns="x" xmlns:r="r"><workbookPr/><bookViews><workbookView/></bookViews><sheets><sheet name="S" sheetId="1" r:id="rId1"/></sheets><calcPr calcId="1"/></workbook>"#;
        let protection = BytesStart::new("workbookProtection")
            .with_attributes([("workbookPassword", "CC3D"), ("lockStructure", "1")]);
        let rewritten =
            rewrite_workbook(workbook, Some(&protection), &[(1, "rId9".to_string())]).unwrap();
        let text = derive_text(rewritten);
        assert!(text.contains(
            r#"<workbookPr/><workbookProtection workbookPassword="CC3D" lockStructure="1"/><bookViews>"#
        ));
        assert!(text.contains(
            r#"<calcPr calcId="1"/><pivotCaches><pivotCache cacheId="1" r:id="rId9"/></pivotCaches></workbook>"#
        ));
    }

    #[test]
    fn test_rewrite_sheet_pane_expands_empty_view() {
        let sheet = br#"<worksheet><sheetViews><sheetView tabSelected="1" workbookViewId="0"/></sheetViews></worksheet>"#;
        let split_pane = SpecSplitPane {
            sheet_name: "S".to_string(),
            x_split: 2000,
            y_split: 0,
            top_left_cell: "C1".to_string(),
            active_pane: String::new(),
        };
        let text = derive_text(rewrite_sheet_pane(sheet, &split_pane).unwrap());
        assert_eq!(
            text,
            r#"<worksheet><sheetViews><sheetView tabSelected="1" workbookViewId="0"><pane xSplit="2000" topLeftCell="C1" activePane="bottomRight" state="split"/></sheetView></sheetViews></worksheet>"#
        );
    }

    #[test]
    fn test_rewrite_core_properties_replaces_fields() {
        let core = br#"<cp:coreProperties xmlns:cp="cp" xmlns:dc="dc" xmlns:dcterms="t" xmlns:xsi="x"><dc:creator>me</dc:creator><dcterms:created xsi:type="dcterms:W3CDTF">2020-01-01T00:00:00Z</dcterms:created></cp:coreProperties>"#;
        let doc_props = SpecDocProperties {
            created: "2024-05-01T00:00:00Z".to_string(),
            language: "en-US".to_string(),
            ..SpecDocProperties::default()
        };
        let text = derive_text(rewrite_core_properties(core, &doc_props).unwrap());
        assert!(text.contains("<dc:creator>me</dc:creator>"));
        assert!(!text.contains("2020-01-01"));
        assert!(text.contains("<dc:language>en-US</dc:language>"));
        assert!(text.contains(
            r#"<dcterms:created xsi:type="dcterms:W3CDTF">2024-05-01T00:00:00Z</dcterms:created>"#
        ));
    }

    #[test]
    fn test_protection_element_by_algorithm() {
        let mut report = SpecXlsxBuildReport::default();
        let spec = SpecWorkbookProtection {
            algorithm: "SHA-512".to_string(),
            password: "secret".to_string(),
            lock_structure: true,
            lock_windows: false,
        };
        let element = derive_protection_element(&spec, &mut report).unwrap();
        assert!(read_attribute(&element, b"workbookHashValue").unwrap().is_some());
        assert_eq!(
            read_attribute(&element, b"workbookSpinCount").unwrap().as_deref(),
            Some("100000")
        );

        let spec_md4 = SpecWorkbookProtection {
            algorithm: "MD4".to_string(),
            ..spec
        };
        assert!(derive_protection_element(&spec_md4, &mut report).is_none());
        assert_eq!(report.warnings.len(), 1);
    }
}
