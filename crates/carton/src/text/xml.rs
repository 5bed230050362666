use crate::{wire, Container, Entry, Error, Header, Result, Value, ValueKind};
use quick_xml::events::attributes::Attribute;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::name::QName;
use quick_xml::{Reader, Writer};
use std::borrow::Cow;
use std::sync::Arc;

/// Render a container as XML 1.0:
/// `<container version="1"><header>..</header><values>..</values></container>`.
///
/// The five predefined entities are escaped everywhere; control
/// characters (other than TAB/LF/CR) become numeric character
/// references. Scalar payloads use the same lossless textual rendering
/// as Value's Display.
pub(crate) fn container_to_xml(container: &Container) -> Result<String> {
    let mut path = vec![container as *const Container];
    let (header, entries) = container.snapshot_parts();

    let mut writer = Writer::new(Vec::new());
    write_container(&mut writer, &header, &entries, &mut path)?;

    String::from_utf8(writer.into_inner()).map_err(|err| Error::EncodingError(err.to_string()))
}

fn write_container<W: std::io::Write>(
    writer: &mut Writer<W>,
    header: &Header,
    entries: &[Entry],
    path: &mut Vec<*const Container>,
) -> Result<()> {
    // The attribute is the wire-format version, currently 1.
    debug_assert_eq!(wire::VERSION, 1);
    let mut root = BytesStart::new("container");
    root.push_attribute(("version", "1"));
    emit(writer, Event::Start(root))?;

    emit(writer, Event::Start(BytesStart::new("header")))?;
    for (tag, text) in [
        ("source_id", &header.source_id),
        ("source_sub_id", &header.source_sub_id),
        ("target_id", &header.target_id),
        ("target_sub_id", &header.target_sub_id),
        ("message_type", &header.message_type),
        ("version", &header.version),
    ] {
        write_text_element(writer, tag, text)?;
    }
    emit(writer, Event::End(BytesEnd::new("header")))?;

    emit(writer, Event::Start(BytesStart::new("values")))?;
    for entry in entries {
        write_value(writer, entry, path)?;
    }
    emit(writer, Event::End(BytesEnd::new("values")))?;

    emit(writer, Event::End(BytesEnd::new("container")))
}

fn write_value<W: std::io::Write>(
    writer: &mut Writer<W>,
    entry: &Entry,
    path: &mut Vec<*const Container>,
) -> Result<()> {
    let mut start = BytesStart::new("value");
    push_escaped_attribute(&mut start, "key", &entry.name);
    push_escaped_attribute(&mut start, "type", entry.value.kind().name());

    match &entry.value {
        Value::Null => return emit(writer, Event::Empty(start)),
        Value::Container(child) => {
            let identity = Arc::as_ptr(child);
            if path.contains(&identity) {
                return Err(Error::SerializeFailed(
                    "container references itself; XML has no back-reference form".to_string(),
                ));
            }
            path.push(identity);

            emit(writer, Event::Start(start))?;
            let (child_header, child_entries) = child.snapshot_parts();
            write_container(writer, &child_header, &child_entries, path)?;
            path.pop();
        }
        Value::Array(elements) => {
            emit(writer, Event::Start(start))?;
            for element in elements {
                write_value(writer, element, path)?;
            }
        }
        // Scalars, bytes, and strings use the lossless Display rendering.
        scalar => {
            emit(writer, Event::Start(start))?;
            emit(
                writer,
                Event::Text(BytesText::from_escaped(escape_xml(&scalar.to_string()))),
            )?;
        }
    }
    emit(writer, Event::End(BytesEnd::new("value")))
}

fn write_text_element<W: std::io::Write>(
    writer: &mut Writer<W>,
    tag: &str,
    text: &str,
) -> Result<()> {
    emit(writer, Event::Start(BytesStart::new(tag)))?;
    emit(writer, Event::Text(BytesText::from_escaped(escape_xml(text))))?;
    emit(writer, Event::End(BytesEnd::new(tag)))
}

// Attribute values are escaped by us and pushed verbatim, so quotes and
// control characters in keys can't break the document.
fn push_escaped_attribute(start: &mut BytesStart<'_>, key: &'static str, value: &str) {
    let escaped = escape_xml(value).into_owned().into_bytes();
    start.push_attribute(Attribute {
        key: QName(key.as_bytes()),
        value: Cow::Owned(escaped),
    });
}

fn emit<W: std::io::Write>(writer: &mut Writer<W>, event: Event<'_>) -> Result<()> {
    writer
        .write_event(event)
        .map_err(|err| Error::SerializeFailed(err.to_string()))
}

/// Escape the five predefined XML entities, and encode control
/// characters other than TAB/LF/CR as numeric character references.
fn escape_xml(raw: &str) -> Cow<'_, str> {
    fn needs_escape(c: char) -> bool {
        matches!(c, '&' | '<' | '>' | '"' | '\'')
            || (c.is_control() && !matches!(c, '\t' | '\n' | '\r'))
    }
    if !raw.chars().any(needs_escape) {
        return Cow::Borrowed(raw);
    }

    use std::fmt::Write;
    let mut out = String::with_capacity(raw.len() + 8);
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c if needs_escape(c) => {
                write!(out, "&#x{:X};", c as u32).expect("writing to a String")
            }
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Parse the shape `container_to_xml` emits back into a container.
/// Logical equality is preserved; floats round-trip through their
/// shortest textual form, with `NaN`/`inf`/`-inf` restored as the
/// corresponding non-finite values.
pub(crate) fn container_from_xml(s: &str) -> Result<Container> {
    let mut reader = Reader::from_str(s);
    let mut stack: Vec<Scope> = Vec::new();
    let mut root: Option<Container> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|err| Error::DeserializeFailed(err.to_string()))?;
        match event {
            Event::Start(start) => match start.name().as_ref() {
                b"container" => {
                    if root.is_some() {
                        return Err(invalid("content after the root container"));
                    }
                    stack.push(Scope::Container(ContainerScope::default()));
                }
                b"header" => {
                    top_container(&mut stack)?.in_header = true;
                }
                b"values" => {
                    top_container(&mut stack)?.in_values = true;
                }
                b"value" => {
                    stack.push(Scope::Value(ValueScope::from_attributes(&start)?));
                }
                tag => {
                    let scope = top_container(&mut stack)?;
                    if !scope.in_header {
                        return Err(invalid(format!(
                            "unexpected element <{}>",
                            String::from_utf8_lossy(tag)
                        )));
                    }
                    scope.header_tag = Some(tag.to_vec());
                }
            },
            Event::Empty(start) => {
                if start.name().as_ref() != b"value" {
                    return Err(invalid("unexpected empty element"));
                }
                let scope = ValueScope::from_attributes(&start)?;
                let entry = scope.finish()?;
                attach(&mut stack, entry)?;
            }
            Event::Text(text) => {
                let text = text
                    .unescape()
                    .map_err(|err| Error::DeserializeFailed(err.to_string()))?;
                match stack.last_mut() {
                    Some(Scope::Value(scope)) => scope.text.push_str(&text),
                    Some(Scope::Container(scope)) if scope.header_tag.is_some() => {
                        scope.set_header_field(&text)?;
                    }
                    _ => return Err(invalid("unexpected text content")),
                }
            }
            Event::End(end) => match end.name().as_ref() {
                b"container" => {
                    let Some(Scope::Container(scope)) = stack.pop() else {
                        return Err(invalid("mismatched </container>"));
                    };
                    let container = Container::from_parts(scope.header, scope.entries);
                    match stack.last_mut() {
                        None => root = Some(container),
                        Some(Scope::Value(parent)) if parent.kind == ValueKind::Container => {
                            parent.container = Some(container);
                        }
                        _ => return Err(invalid("container element outside a container value")),
                    }
                }
                b"header" => top_container(&mut stack)?.in_header = false,
                b"values" => top_container(&mut stack)?.in_values = false,
                b"value" => {
                    let Some(Scope::Value(scope)) = stack.pop() else {
                        return Err(invalid("mismatched </value>"));
                    };
                    let entry = scope.finish()?;
                    attach(&mut stack, entry)?;
                }
                _ => {
                    top_container(&mut stack)?.header_tag = None;
                }
            },
            Event::Eof => break,
            // The encoder emits no declarations, comments, or PIs.
            _ => return Err(invalid("unsupported XML construct")),
        }
    }

    root.ok_or_else(|| invalid("no root <container> element"))
}

#[derive(Default)]
struct ContainerScope {
    header: Header,
    entries: Vec<Entry>,
    in_header: bool,
    in_values: bool,
    header_tag: Option<Vec<u8>>,
}

impl ContainerScope {
    fn set_header_field(&mut self, text: &str) -> Result<()> {
        let tag = self.header_tag.as_deref().expect("checked by caller");
        let slot = match tag {
            b"source_id" => &mut self.header.source_id,
            b"source_sub_id" => &mut self.header.source_sub_id,
            b"target_id" => &mut self.header.target_id,
            b"target_sub_id" => &mut self.header.target_sub_id,
            b"message_type" => &mut self.header.message_type,
            b"version" => &mut self.header.version,
            other => {
                return Err(invalid(format!(
                    "unknown header field <{}>",
                    String::from_utf8_lossy(other)
                )))
            }
        };
        *slot = text.to_string();
        Ok(())
    }
}

struct ValueScope {
    name: String,
    kind: ValueKind,
    text: String,
    children: Vec<Entry>,
    container: Option<Container>,
}

impl ValueScope {
    fn from_attributes(start: &BytesStart<'_>) -> Result<Self> {
        let mut name = None;
        let mut kind = None;
        for attr in start.attributes() {
            let attr = attr.map_err(|err| Error::DeserializeFailed(err.to_string()))?;
            let value = attr
                .unescape_value()
                .map_err(|err| Error::DeserializeFailed(err.to_string()))?;
            match attr.key.as_ref() {
                b"key" => name = Some(value.into_owned()),
                b"type" => {
                    kind = Some(ValueKind::from_name(&value).ok_or_else(|| {
                        invalid(format!("unknown type tag '{value}'"))
                    })?)
                }
                _ => return Err(invalid("unknown attribute on <value>")),
            }
        }
        Ok(Self {
            name: name.unwrap_or_default(),
            kind: kind.ok_or_else(|| invalid("<value> is missing its type attribute"))?,
            text: String::new(),
            children: Vec::new(),
            container: None,
        })
    }

    fn finish(self) -> Result<Entry> {
        let kind = self.kind;
        let text = self.text;

        let value = match kind {
            ValueKind::Null => {
                if !text.is_empty() {
                    return Err(invalid("null value with a payload"));
                }
                Value::Null
            }
            ValueKind::Bool => match text.as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                other => return Err(invalid(format!("invalid bool payload '{other}'"))),
            },
            ValueKind::Int16 => Value::Int16(parse_number(&text, kind)?),
            ValueKind::UInt16 => Value::UInt16(parse_number(&text, kind)?),
            ValueKind::Int32 => Value::Int32(parse_number(&text, kind)?),
            ValueKind::UInt32 => Value::UInt32(parse_number(&text, kind)?),
            ValueKind::Long32 => Value::long32(parse_number(&text, kind)?)?,
            ValueKind::ULong32 => Value::ulong32(parse_number(&text, kind)?)?,
            ValueKind::Int64 => Value::Int64(parse_number(&text, kind)?),
            ValueKind::UInt64 => Value::UInt64(parse_number(&text, kind)?),
            // Rust's float parser accepts the NaN / inf / -inf forms the
            // encoder writes.
            ValueKind::Float32 => Value::Float32(parse_number(&text, kind)?),
            ValueKind::Float64 => Value::Float64(parse_number(&text, kind)?),
            ValueKind::Bytes => {
                let b64 = text.strip_prefix("bytes:").ok_or_else(|| {
                    invalid("bytes payload lacks its 'bytes:' prefix")
                })?;
                Value::Bytes(
                    base64::decode(b64)
                        .map_err(|err| invalid(format!("invalid base64: {err}")))?,
                )
            }
            ValueKind::String => Value::String(text),
            ValueKind::Container => Value::Container(Arc::new(
                self.container
                    .ok_or_else(|| invalid("container value without a <container> child"))?,
            )),
            ValueKind::Array => Value::Array(self.children),
        };
        Ok(Entry {
            name: self.name,
            value,
        })
    }
}

fn top_container<'s>(stack: &'s mut [Scope]) -> Result<&'s mut ContainerScope> {
    match stack.last_mut() {
        Some(Scope::Container(scope)) => Ok(scope),
        _ => Err(invalid("element outside a <container>")),
    }
}

// A completed <value> attaches to the enclosing array value, or to the
// enclosing container's value list.
fn attach(stack: &mut [Scope], entry: Entry) -> Result<()> {
    match stack.last_mut() {
        Some(Scope::Value(parent)) if parent.kind == ValueKind::Array => {
            parent.children.push(entry);
            Ok(())
        }
        Some(Scope::Container(scope)) if scope.in_values => {
            scope.entries.push(entry);
            Ok(())
        }
        _ => Err(invalid("<value> outside <values> or an array value")),
    }
}

fn parse_number<T: std::str::FromStr>(text: &str, kind: ValueKind) -> Result<T> {
    text.parse()
        .map_err(|_| invalid(format!("invalid {kind} payload '{text}'")))
}

enum Scope {
    Container(ContainerScope),
    Value(ValueScope),
}

fn invalid(message: impl Into<String>) -> Error {
    Error::InvalidFormat(message.into())
}
