//! Textual `.reg` codec.
//!
//! Parses Windows Registry Editor export text into an ordered [`Operation`]
//! stream, applies that stream to an [`Editor`], and emits a stream back to
//! canonical text. Parsing and emission are independent of any particular
//! hive; the operation stream is the interchange format between them.

use crate::cell::ValueType;
use crate::editor::{CreateKeyOptions, DeleteKeyOptions, Editor};
use crate::error::{RegistryError, Result};
use crate::utils::{fold_name, names_equal_fold};
use crate::value::ValueData;
use std::collections::BTreeMap;

/// One step in a `.reg` patch, in the order it appeared in the source text.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    CreateKey { path: String },
    DeleteKey { path: String },
    SetValue { path: String, name: String, data: ValueData },
    DeleteValue { path: String, name: String },
}

/// Controls how stanza paths are canonicalized during parsing.
///
/// If both `prefix` and `auto_prefix` are set, `prefix` wins.
#[derive(Debug, Clone, Default)]
pub struct RegParseOptions {
    /// Every stanza path must start with this (case-insensitive, by path
    /// segment); the prefix is stripped. A mismatch aborts the whole parse.
    pub prefix: Option<String>,
    /// Strip a recognized hive root (and alias) from the front of every
    /// path, plus the following segment when it names a flat hive file.
    pub auto_prefix: bool,
}

const AUTO_PREFIX_ROOTS: &[&str] = &[
    "HKEY_LOCAL_MACHINE",
    "HKLM",
    "HKEY_CURRENT_USER",
    "HKCU",
    "HKEY_USERS",
    "HKU",
    "HKEY_CLASSES_ROOT",
    "HKCR",
    "HKEY_CURRENT_CONFIG",
    "HKCC",
];

/// Second-segment hive file names stripped alongside the root. Matched by
/// exact case: real exports always spell these in caps, and a mixed-case
/// segment (e.g. `Software`) is an ordinary key name, not the hive file.
const AUTO_PREFIX_HIVE_NAMES: &[&str] = &["SOFTWARE", "SYSTEM", "SAM", "SECURITY"];

fn parse_err(line: usize, reason: impl Into<String>) -> RegistryError {
    RegistryError::ParseError { line, column: 0, reason: reason.into() }
}

/// Strips `prefix` from `path` by path segment, case-insensitively.
fn strip_prefix_segments(path: &str, prefix: &str) -> Option<String> {
    let path_segs: Vec<&str> = path.split('\\').collect();
    let prefix_segs: Vec<&str> = prefix.split('\\').filter(|s| !s.is_empty()).collect();
    if prefix_segs.is_empty() || path_segs.len() < prefix_segs.len() {
        return None;
    }
    for (p, pre) in path_segs.iter().zip(prefix_segs.iter()) {
        if !names_equal_fold(p, pre) {
            return None;
        }
    }
    Some(path_segs[prefix_segs.len()..].join("\\"))
}

fn canonicalize_path(raw: &str, options: &RegParseOptions) -> Result<String> {
    if let Some(prefix) = &options.prefix {
        return strip_prefix_segments(raw, prefix).ok_or_else(|| RegistryError::PrefixMismatch {
            expected: prefix.clone(),
            got: raw.to_string(),
        });
    }

    if options.auto_prefix {
        let segs: Vec<&str> = raw.split('\\').collect();
        if let Some(first) = segs.first() {
            if AUTO_PREFIX_ROOTS.iter().any(|alias| names_equal_fold(alias, first)) {
                let mut strip = 1;
                if let Some(second) = segs.get(1).copied() {
                    if AUTO_PREFIX_HIVE_NAMES.contains(&second) {
                        strip = 2;
                    }
                }
                return Ok(segs[strip..].join("\\"));
            }
        }
    }

    Ok(raw.to_string())
}

/// Joins lines ending in a bare trailing `\` with the line that follows,
/// trimming leading whitespace off the continuation (hex byte lists are
/// conventionally indented when wrapped). Accepts both CRLF and LF input.
fn join_continuations(text: &str) -> Vec<String> {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut result = Vec::new();
    let mut pending = String::new();
    let mut continuing = false;
    for line in normalized.split('\n') {
        let line = if continuing { line.trim_start() } else { line };
        if let Some(stripped) = line.strip_suffix('\\') {
            pending.push_str(stripped);
            continuing = true;
        } else {
            pending.push_str(line);
            result.push(std::mem::take(&mut pending));
            continuing = false;
        }
    }
    if !pending.is_empty() || continuing {
        result.push(pending);
    }
    result
}

fn parse_header_line(line: &str, options: &RegParseOptions, line_no: usize) -> Result<Operation> {
    let inner = line
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| parse_err(line_no, "malformed key header"))?;
    let (deleted, path_raw) = match inner.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, inner),
    };
    let path = canonicalize_path(path_raw, options)?;
    Ok(if deleted { Operation::DeleteKey { path } } else { Operation::CreateKey { path } })
}

/// Splits a value line into its raw name token (`@` or a quoted string,
/// quotes included) and the raw value text after the `=`.
fn split_name_value(line: &str, line_no: usize) -> Result<(&str, &str)> {
    if let Some(rest) = line.strip_prefix('@') {
        let rest = rest.strip_prefix('=').ok_or_else(|| parse_err(line_no, "expected '=' after @"))?;
        return Ok(("@", rest));
    }

    if !line.starts_with('"') {
        return Err(parse_err(line_no, "expected quoted value name"));
    }
    let bytes = line.as_bytes();
    let mut i = 1;
    let mut escaped = false;
    while i < bytes.len() {
        match bytes[i] {
            _ if escaped => escaped = false,
            b'\\' => escaped = true,
            b'"' => break,
            _ => {}
        }
        i += 1;
    }
    if i >= bytes.len() {
        return Err(parse_err(line_no, "unterminated value name"));
    }
    let name_part = &line[..=i];
    let rest = line[i + 1..]
        .strip_prefix('=')
        .ok_or_else(|| parse_err(line_no, "expected '=' after value name"))?;
    Ok((name_part, rest))
}

fn unescape_quoted(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('\\') => out.push('\\'),
                Some('"') => out.push('"'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn parse_quoted(s: &str, line_no: usize) -> Result<String> {
    let inner = s
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .ok_or_else(|| parse_err(line_no, "expected quoted string"))?;
    Ok(unescape_quoted(inner))
}

fn parse_hex_bytes(s: &str, line_no: usize) -> Result<Vec<u8>> {
    s.split(',')
        .map(str::trim)
        .filter(|tok| !tok.is_empty())
        .map(|tok| {
            u8::from_str_radix(tok, 16).map_err(|_| parse_err(line_no, format!("invalid hex byte '{tok}'")))
        })
        .collect()
}

fn parse_typed_value(s: &str, line_no: usize) -> Result<ValueData> {
    if s.starts_with('"') {
        return Ok(ValueData::String(parse_quoted(s, line_no)?));
    }
    if let Some(rest) = s.strip_prefix("dword:") {
        let v = u32::from_str_radix(rest.trim(), 16).map_err(|_| parse_err(line_no, "invalid dword literal"))?;
        return Ok(ValueData::Dword(v));
    }
    if let Some(rest) = s.strip_prefix("hex(") {
        let close = rest.find(')').ok_or_else(|| parse_err(line_no, "unterminated hex type code"))?;
        let code =
            u32::from_str_radix(&rest[..close], 16).map_err(|_| parse_err(line_no, "invalid hex type code"))?;
        let bytes_part = rest[close + 1..]
            .strip_prefix(':')
            .ok_or_else(|| parse_err(line_no, "expected ':' after hex type code"))?;
        let bytes = parse_hex_bytes(bytes_part, line_no)?;
        let value_type = ValueType::from_u32(code)?;
        return ValueData::parse(&bytes, value_type, 0);
    }
    if let Some(rest) = s.strip_prefix("hex:") {
        return Ok(ValueData::Binary(parse_hex_bytes(rest, line_no)?));
    }
    Err(parse_err(line_no, format!("unrecognized value literal: {s}")))
}

fn parse_value_line(line: &str, path: &str, line_no: usize) -> Result<Operation> {
    let (name_part, value_part) = split_name_value(line, line_no)?;
    let name = if name_part == "@" { String::new() } else { parse_quoted(name_part, line_no)? };
    let value_part = value_part.trim();
    if value_part == "-" {
        return Ok(Operation::DeleteValue { path: path.to_string(), name });
    }
    let data = parse_typed_value(value_part, line_no)?;
    Ok(Operation::SetValue { path: path.to_string(), name, data })
}

/// Parses `.reg` text into an operation stream.
///
/// `options.prefix`, when set, requires every stanza path to start with it;
/// a non-matching path aborts parsing with [`RegistryError::PrefixMismatch`].
pub fn parse(text: &str, options: &RegParseOptions) -> Result<Vec<Operation>> {
    let lines = join_continuations(text);
    let mut ops = Vec::new();
    let mut current_path: Option<String> = None;
    let mut saw_header = false;

    for (idx, raw_line) in lines.iter().enumerate() {
        let line_no = idx + 1;
        let trimmed = raw_line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !saw_header {
            if trimmed == "Windows Registry Editor Version 5.00" || trimmed == "REGEDIT4" {
                saw_header = true;
                continue;
            }
            return Err(parse_err(line_no, "missing .reg header line"));
        }

        if trimmed.starts_with('[') {
            let op = parse_header_line(trimmed, options, line_no)?;
            current_path = Some(match &op {
                Operation::CreateKey { path } | Operation::DeleteKey { path } => path.clone(),
                _ => unreachable!("parse_header_line only returns key operations"),
            });
            ops.push(op);
        } else {
            let path = current_path
                .clone()
                .ok_or_else(|| parse_err(line_no, "value line outside any key stanza"))?;
            ops.push(parse_value_line(trimmed, &path, line_no)?);
        }
    }

    if !saw_header {
        return Err(parse_err(0, "empty .reg document"));
    }
    Ok(ops)
}

/// Applies a parsed operation stream to `editor`, in order. A `SetValue` on
/// a key that doesn't exist yet implicitly creates the full path first, and
/// a `.reg`-style key deletion is always recursive.
pub fn merge(editor: &mut Editor<'_>, ops: &[Operation]) -> Result<()> {
    for op in ops {
        match op {
            Operation::CreateKey { path } => {
                editor.create_key(path, CreateKeyOptions::default())?;
            }
            Operation::DeleteKey { path } => {
                editor.delete_key(path, DeleteKeyOptions { recursive: true })?;
            }
            Operation::SetValue { path, name, data } => {
                editor.create_key(path, CreateKeyOptions::default())?;
                editor.set_value(path, name, data.clone())?;
            }
            Operation::DeleteValue { path, name } => {
                editor.delete_value(path, name)?;
            }
        }
    }
    Ok(())
}

enum ValueOp {
    Set(ValueData),
    Delete,
}

#[derive(Default)]
struct ExportNode {
    present: bool,
    deleted: bool,
    values: BTreeMap<String, (String, ValueOp)>,
    children: BTreeMap<String, (String, ExportNode)>,
}

fn export_node_mut<'t>(root: &'t mut ExportNode, path: &str) -> &'t mut ExportNode {
    let mut node = root;
    for seg in path.split('\\').filter(|s| !s.is_empty()) {
        let key = fold_name(seg);
        node = &mut node.children.entry(key).or_insert_with(|| (seg.to_string(), ExportNode::default())).1;
    }
    node
}

fn escape_quoted(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn quote_value_name(name: &str) -> String {
    if name.is_empty() { "@".to_string() } else { format!("\"{}\"", escape_quoted(name)) }
}

const HEX_WRAP_COLUMN: usize = 80;

fn wrap_hex_line(prefix: &str, hex_bytes: &[String]) -> String {
    let mut out = String::from(prefix);
    let mut col = prefix.len();
    for (i, byte) in hex_bytes.iter().enumerate() {
        let token = if i + 1 == hex_bytes.len() { byte.clone() } else { format!("{byte},") };
        if col + token.len() > HEX_WRAP_COLUMN {
            out.push_str("\\\r\n  ");
            col = 2;
        }
        out.push_str(&token);
        col += token.len();
    }
    out
}

fn encode_hex_form(ty: ValueType, bytes: &[u8]) -> String {
    let hex_bytes: Vec<String> = bytes.iter().map(|b| format!("{b:02x}")).collect();
    wrap_hex_line(&ty.reg_hex_prefix(), &hex_bytes)
}

fn encode_typed_value(data: &ValueData) -> String {
    match data {
        ValueData::String(s) => format!("\"{}\"", escape_quoted(s)),
        ValueData::Dword(d) => format!("dword:{d:08x}"),
        other => {
            let (bytes, ty) = other.clone().encode();
            encode_hex_form(ty, &bytes)
        }
    }
}

fn emit_node(out: &mut String, node: &ExportNode, path: &str) {
    let has_content = node.present || node.deleted || !node.values.is_empty();
    if !path.is_empty() && has_content {
        if node.deleted {
            out.push_str(&format!("[-{path}]\r\n\r\n"));
        } else {
            out.push_str(&format!("[{path}]\r\n"));
            for (display_name, op) in node.values.values() {
                match op {
                    ValueOp::Delete => out.push_str(&format!("{}=-\r\n", quote_value_name(display_name))),
                    ValueOp::Set(data) => {
                        out.push_str(&format!("{}={}\r\n", quote_value_name(display_name), encode_typed_value(data)))
                    }
                }
            }
            out.push_str("\r\n");
        }
    }

    if node.deleted {
        return;
    }
    for (display_name, child) in node.children.values() {
        let child_path = if path.is_empty() { display_name.clone() } else { format!("{path}\\{display_name}") };
        emit_node(out, child, &child_path);
    }
}

/// Emits an operation stream as canonical `.reg` text: keys depth-first by
/// case-folded name, values sorted case-foldedly within a key, binary data
/// as 80-column-wrapped `hex(N)`.
pub fn emit(ops: &[Operation]) -> String {
    let mut root = ExportNode::default();
    for op in ops {
        match op {
            Operation::CreateKey { path } => {
                let node = export_node_mut(&mut root, path);
                node.present = true;
                node.deleted = false;
            }
            Operation::DeleteKey { path } => {
                export_node_mut(&mut root, path).deleted = true;
            }
            Operation::SetValue { path, name, data } => {
                let node = export_node_mut(&mut root, path);
                node.present = true;
                node.values.insert(fold_name(name), (name.clone(), ValueOp::Set(data.clone())));
            }
            Operation::DeleteValue { path, name } => {
                let node = export_node_mut(&mut root, path);
                node.values.insert(fold_name(name), (name.clone(), ValueOp::Delete));
            }
        }
    }

    let mut out = String::from("Windows Registry Editor Version 5.00\r\n\r\n");
    emit_node(&mut out, &root, "");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "Windows Registry Editor Version 5.00\r\n\r\n\
[HKEY_LOCAL_MACHINE\\SOFTWARE\\TestApp]\r\n\
\"Version\"=\"1.0\"\r\n\
\"Count\"=dword:0000002a\r\n\
\r\n\
[-HKEY_LOCAL_MACHINE\\SOFTWARE\\ObsoleteApp]\r\n";

    #[test]
    fn parses_prefixed_merge_into_expected_operation_stream() {
        let options = RegParseOptions { prefix: Some("HKEY_LOCAL_MACHINE\\SOFTWARE".into()), auto_prefix: false };
        let ops = parse(SAMPLE, &options).unwrap();
        assert_eq!(
            ops,
            vec![
                Operation::CreateKey { path: "TestApp".into() },
                Operation::SetValue {
                    path: "TestApp".into(),
                    name: "Version".into(),
                    data: ValueData::String("1.0".into())
                },
                Operation::SetValue {
                    path: "TestApp".into(),
                    name: "Count".into(),
                    data: ValueData::Dword(42)
                },
                Operation::DeleteKey { path: "ObsoleteApp".into() },
            ]
        );
    }

    #[test]
    fn mismatched_prefix_halts_parsing() {
        let options = RegParseOptions { prefix: Some("HKEY_CURRENT_USER".into()), auto_prefix: false };
        let err = parse(SAMPLE, &options).unwrap_err();
        assert!(matches!(err, RegistryError::PrefixMismatch { .. }));
    }

    #[test]
    fn auto_prefix_strips_root_and_hive_name_for_hklm() {
        let text = "Windows Registry Editor Version 5.00\r\n\r\n[HKLM\\SOFTWARE\\Test]\r\n";
        let options = RegParseOptions { prefix: None, auto_prefix: true };
        let ops = parse(text, &options).unwrap();
        assert_eq!(ops, vec![Operation::CreateKey { path: "Test".into() }]);
    }

    #[test]
    fn auto_prefix_strips_only_root_for_hkcu() {
        let text = "Windows Registry Editor Version 5.00\r\n\r\n[HKCU\\Software\\Test]\r\n";
        let options = RegParseOptions { prefix: None, auto_prefix: true };
        let ops = parse(text, &options).unwrap();
        assert_eq!(ops, vec![Operation::CreateKey { path: "Software\\Test".into() }]);
    }

    #[test]
    fn regedit4_header_is_accepted() {
        let text = "REGEDIT4\r\n\r\n[Foo]\r\n\"a\"=\"b\"\r\n";
        let ops = parse(text, &RegParseOptions::default()).unwrap();
        assert_eq!(
            ops,
            vec![
                Operation::CreateKey { path: "Foo".into() },
                Operation::SetValue { path: "Foo".into(), name: "a".into(), data: ValueData::String("b".into()) },
            ]
        );
    }

    #[test]
    fn default_value_and_delete_value_forms_parse() {
        let text = "Windows Registry Editor Version 5.00\r\n\r\n[Foo]\r\n@=\"bar\"\r\n\"Gone\"=-\r\n";
        let ops = parse(text, &RegParseOptions::default()).unwrap();
        assert_eq!(
            ops,
            vec![
                Operation::CreateKey { path: "Foo".into() },
                Operation::SetValue { path: "Foo".into(), name: String::new(), data: ValueData::String("bar".into()) },
                Operation::DeleteValue { path: "Foo".into(), name: "Gone".into() },
            ]
        );
    }

    #[test]
    fn hex_continuation_lines_join_into_one_value() {
        let text = "Windows Registry Editor Version 5.00\r\n\r\n[Foo]\r\n\"Blob\"=hex(3):01,02,\\\r\n  03,04\r\n";
        let ops = parse(text, &RegParseOptions::default()).unwrap();
        assert_eq!(
            ops,
            vec![
                Operation::CreateKey { path: "Foo".into() },
                Operation::SetValue {
                    path: "Foo".into(),
                    name: "Blob".into(),
                    data: ValueData::Binary(vec![1, 2, 3, 4])
                },
            ]
        );
    }

    #[test]
    fn bare_hex_is_equivalent_to_hex_3() {
        let text = "Windows Registry Editor Version 5.00\r\n\r\n[Foo]\r\n\"Blob\"=hex:de,ad\r\n";
        let ops = parse(text, &RegParseOptions::default()).unwrap();
        assert_eq!(
            ops[1],
            Operation::SetValue { path: "Foo".into(), name: "Blob".into(), data: ValueData::Binary(vec![0xDE, 0xAD]) }
        );
    }

    #[test]
    fn escaped_backslash_in_quoted_string_unescapes() {
        // On-disk .reg text: "Path"="C:\\Temp" (two backslash chars, escaped).
        let line = r#""Path"="C:\\Temp""#;
        let text = format!("Windows Registry Editor Version 5.00\r\n\r\n[Foo]\r\n{line}\r\n");
        let ops = parse(&text, &RegParseOptions::default()).unwrap();
        assert_eq!(
            ops[1],
            Operation::SetValue { path: "Foo".into(), name: "Path".into(), data: ValueData::String(r"C:\Temp".into()) }
        );
    }

    #[test]
    fn escaped_quote_in_quoted_string_unescapes() {
        // On-disk .reg text: "Name"="a\"b"
        let line = r#""Name"="a\"b""#;
        let text = format!("Windows Registry Editor Version 5.00\r\n\r\n[Foo]\r\n{line}\r\n");
        let ops = parse(&text, &RegParseOptions::default()).unwrap();
        assert_eq!(
            ops[1],
            Operation::SetValue { path: "Foo".into(), name: "Name".into(), data: ValueData::String("a\"b".into()) }
        );
    }

    #[test]
    fn parse_of_emit_reproduces_the_same_operations() {
        let ops = vec![
            Operation::CreateKey { path: "App".into() },
            Operation::SetValue { path: "App".into(), name: "Version".into(), data: ValueData::String("1.0".into()) },
            Operation::SetValue { path: "App".into(), name: "Count".into(), data: ValueData::Dword(42) },
            Operation::CreateKey { path: "App\\Sub".into() },
            Operation::SetValue {
                path: "App\\Sub".into(),
                name: "Blob".into(),
                data: ValueData::Binary(vec![0, 1, 2, 255]),
            },
            Operation::DeleteKey { path: "Old".into() },
        ];
        let text = emit(&ops);
        let reparsed = parse(&text, &RegParseOptions::default()).unwrap();

        let mut expected = ops.clone();
        expected.sort_by_key(|op| format!("{op:?}"));
        let mut actual = reparsed;
        actual.sort_by_key(|op| format!("{op:?}"));
        assert_eq!(actual, expected);
    }

    #[test]
    fn emit_orders_keys_depth_first_by_case_folded_name() {
        let ops = vec![
            Operation::CreateKey { path: "Zeta".into() },
            Operation::CreateKey { path: "alpha".into() },
            Operation::SetValue { path: "alpha".into(), name: "b".into(), data: ValueData::Dword(1) },
            Operation::SetValue { path: "alpha".into(), name: "A".into(), data: ValueData::Dword(2) },
        ];
        let text = emit(&ops);
        let alpha_pos = text.find("[alpha]").unwrap();
        let zeta_pos = text.find("[Zeta]").unwrap();
        assert!(alpha_pos < zeta_pos);
        let a_pos = text.find("\"A\"=").unwrap();
        let b_pos = text.find("\"b\"=").unwrap();
        assert!(a_pos < b_pos);
    }

    #[test]
    fn long_binary_values_wrap_at_eighty_columns() {
        let ops = vec![Operation::SetValue {
            path: "Foo".into(),
            name: "Blob".into(),
            data: ValueData::Binary(vec![0xAB; 100]),
        }];
        let text = emit(&ops);
        for line in text.lines() {
            assert!(line.len() <= HEX_WRAP_COLUMN + 1, "line too long: {line:?}");
        }
    }
}
