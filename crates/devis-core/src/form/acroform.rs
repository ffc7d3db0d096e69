//! AcroForm filling with lopdf.

use std::path::{Path, PathBuf};

use lopdf::{Dictionary, Document, Object, ObjectId, StringFormat};
use tracing::{debug, info, trace};

use super::fields::{FieldValues, CHECKBOX_ON, MANDATORY_FIELDS};
use crate::error::FormError;
use crate::producers::geometry::decode_pdf_string;

/// Fills a purchase-order template.
pub trait FormWriter {
    /// Write `values` into a copy of `template` at `output`.
    fn fill(&self, template: &Path, values: &FieldValues, output: &Path)
        -> Result<PathBuf, FormError>;
}

/// A terminal form field found in the AcroForm tree.
#[derive(Debug, Clone)]
struct FormField {
    id: ObjectId,
    name: String,
    field_type: Vec<u8>,
    /// Widget annotations carrying the appearance state.
    widgets: Vec<ObjectId>,
}

/// Writes field values into the template's AcroForm dictionary.
#[derive(Debug, Clone)]
pub struct AcroFormWriter {
    mandatory: Vec<String>,
}

impl AcroFormWriter {
    pub fn new() -> Self {
        Self {
            mandatory: MANDATORY_FIELDS.iter().map(|f| f.to_string()).collect(),
        }
    }

    pub fn with_mandatory_fields<S: AsRef<str>>(mut self, fields: &[S]) -> Self {
        self.mandatory = fields.iter().map(|f| f.as_ref().to_string()).collect();
        self
    }

    /// Mandatory fields expected in the output must hold a value.
    fn verify(&self, output: &Path, values: &FieldValues) -> Result<(), FormError> {
        let doc = Document::load(output)?;
        let fields = collect_fields(&doc)?;

        for name in &self.mandatory {
            let expected = values.get(name).is_some_and(|v| !v.trim().is_empty());
            if !expected {
                continue;
            }
            let written = fields
                .iter()
                .find(|f| &f.name == name)
                .and_then(|f| doc.get_dictionary(f.id).ok())
                .and_then(|dict| dict.get(b"V").ok())
                .map(field_text)
                .unwrap_or_default();
            if written.trim().is_empty() {
                return Err(FormError::MissingOutputField(name.clone()));
            }
        }
        Ok(())
    }
}

impl Default for AcroFormWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl FormWriter for AcroFormWriter {
    fn fill(
        &self,
        template: &Path,
        values: &FieldValues,
        output: &Path,
    ) -> Result<PathBuf, FormError> {
        if !template.is_file() {
            return Err(FormError::TemplateNotFound(template.display().to_string()));
        }

        let mut doc = Document::load(template)?;
        let fields = collect_fields(&doc)?;
        debug!("Template has {} form fields", fields.len());

        let mut written = 0;
        for field in &fields {
            let Some(value) = values.get(&field.name) else {
                continue;
            };
            if field.field_type == b"Btn" {
                set_checkbox(&mut doc, field, value == CHECKBOX_ON)?;
            } else {
                doc.get_dictionary_mut(field.id)?
                    .set("V", text_object(value));
            }
            trace!("{} = {:?}", field.name, value);
            written += 1;
        }

        for name in values.keys() {
            if !fields.iter().any(|f| &f.name == name) {
                debug!("Template has no field {}", name);
            }
        }

        acroform_mut(&mut doc)?.set("NeedAppearances", Object::Boolean(true));

        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        doc.save(output)?;

        self.verify(output, values)?;
        info!("Wrote {} field(s) to {}", written, output.display());
        Ok(output.to_path_buf())
    }
}

/// Literal string for ASCII, UTF-16BE with BOM otherwise.
fn text_object(value: &str) -> Object {
    if value.is_ascii() {
        return Object::string_literal(value);
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in value.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

fn field_text(value: &Object) -> String {
    match value {
        Object::String(bytes, _) => decode_pdf_string(bytes),
        Object::Name(name) => String::from_utf8_lossy(name).into_owned(),
        _ => String::new(),
    }
}

fn set_checkbox(doc: &mut Document, field: &FormField, checked: bool) -> Result<(), FormError> {
    let on = field
        .widgets
        .iter()
        .find_map(|&id| on_state(doc, id))
        .unwrap_or_else(|| b"Yes".to_vec());
    let state = if checked { on } else { b"Off".to_vec() };

    doc.get_dictionary_mut(field.id)?
        .set("V", Object::Name(state.clone()));
    for &widget in &field.widgets {
        doc.get_dictionary_mut(widget)?
            .set("AS", Object::Name(state.clone()));
    }
    Ok(())
}

/// Appearance name of the checked state (anything but `Off`).
fn on_state(doc: &Document, widget: ObjectId) -> Option<Vec<u8>> {
    let dict = doc.get_dictionary(widget).ok()?;
    let (_, ap) = doc.dereference(dict.get(b"AP").ok()?).ok()?;
    let (_, normal) = doc.dereference(ap.as_dict().ok()?.get(b"N").ok()?).ok()?;
    normal
        .as_dict()
        .ok()?
        .iter()
        .map(|(name, _)| name.clone())
        .find(|name| name.as_slice() != b"Off")
}

fn root_id(doc: &Document) -> Result<ObjectId, FormError> {
    doc.trailer
        .get(b"Root")
        .and_then(Object::as_reference)
        .map_err(|_| FormError::Pdf("document has no catalog".to_string()))
}

fn acroform_mut(doc: &mut Document) -> Result<&mut Dictionary, FormError> {
    let root = root_id(doc)?;
    let reference = match doc.get_dictionary(root)?.get(b"AcroForm") {
        Ok(Object::Reference(id)) => Some(*id),
        Ok(Object::Dictionary(_)) => None,
        _ => return Err(FormError::NoAcroForm),
    };
    match reference {
        Some(id) => Ok(doc.get_dictionary_mut(id)?),
        None => match doc.get_dictionary_mut(root)?.get_mut(b"AcroForm") {
            Ok(Object::Dictionary(dict)) => Ok(dict),
            _ => Err(FormError::NoAcroForm),
        },
    }
}

/// Every named field of the AcroForm tree, with inherited names and types.
fn collect_fields(doc: &Document) -> Result<Vec<FormField>, FormError> {
    let root = root_id(doc)?;
    let acroform = doc
        .get_dictionary(root)?
        .get(b"AcroForm")
        .map_err(|_| FormError::NoAcroForm)?;
    let (_, acroform) = doc.dereference(acroform)?;
    let acroform = acroform.as_dict().map_err(|_| FormError::NoAcroForm)?;
    let (_, top) = doc.dereference(acroform.get(b"Fields").map_err(|_| FormError::NoAcroForm)?)?;

    let mut fields = Vec::new();
    for item in top.as_array().map_err(|_| FormError::NoAcroForm)? {
        if let Ok(id) = item.as_reference() {
            walk_field(doc, id, "", b"", &mut fields, 0);
        }
    }
    Ok(fields)
}

const MAX_FIELD_DEPTH: usize = 16;

fn walk_field(
    doc: &Document,
    id: ObjectId,
    parent_name: &str,
    parent_type: &[u8],
    fields: &mut Vec<FormField>,
    depth: usize,
) {
    if depth > MAX_FIELD_DEPTH {
        return;
    }
    let Ok(dict) = doc.get_dictionary(id) else {
        return;
    };

    let partial = dict.get(b"T").ok().map(field_text).unwrap_or_default();
    let name = match (parent_name.is_empty(), partial.is_empty()) {
        (_, true) => parent_name.to_string(),
        (true, false) => partial,
        (false, false) => format!("{}.{}", parent_name, partial),
    };
    let field_type = dict
        .get(b"FT")
        .and_then(Object::as_name)
        .map(<[u8]>::to_vec)
        .unwrap_or_else(|_| parent_type.to_vec());

    let kids: Vec<ObjectId> = dict
        .get(b"Kids")
        .and_then(Object::as_array)
        .map(|kids| kids.iter().filter_map(|k| k.as_reference().ok()).collect())
        .unwrap_or_default();

    // Kids without a name of their own are widgets of this field.
    let (named, widgets): (Vec<ObjectId>, Vec<ObjectId>) = kids
        .into_iter()
        .partition(|&kid| doc.get_dictionary(kid).is_ok_and(|k| k.has(b"T")));

    for kid in named {
        walk_field(doc, kid, &name, &field_type, fields, depth + 1);
    }

    if dict.has(b"T") && !name.is_empty() {
        let widgets = if widgets.is_empty() { vec![id] } else { widgets };
        fields.push(FormField {
            id,
            name,
            field_type,
            widgets,
        });
    }
}
