//! Structural extraction from the board's HTML pages.
//!
//! The firmware renders fixed layouts; this module knows them and nothing
//! else does. Every absent element is an error rather than a default, so a
//! firmware change shows up as a failed discovery instead of wrong devices.

use log::trace;
use scraper::{ElementRef, Html, Selector};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Page {
    Names,
    About,
    Status,
}

impl Page {
    pub fn path(self) -> &'static str {
        match self {
            Page::Names => "/names.html",
            Page::About => "/about.html",
            Page::Status => "/cgi/status.cgi",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Selector(String),
    MissingElement { page: Page, element: &'static str },
    MissingAttribute { page: Page, attribute: &'static str },
    InvalidFieldName(String),
    MalformedText { page: Page, element: &'static str, text: String },
    MissingIndicator { index: u32, available: usize },
}

impl core::fmt::Display for ParseError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ParseError::Selector(s) => write!(f, "invalid selector: {}", s),
            ParseError::MissingElement { page, element } => {
                write!(f, "{}: missing element {}", page.path(), element)
            }
            ParseError::MissingAttribute { page, attribute } => {
                write!(f, "{}: input without {} attribute", page.path(), attribute)
            }
            ParseError::InvalidFieldName(name) => write!(f, "no device id in field name {:?}", name),
            ParseError::MalformedText { page, element, text } => {
                write!(f, "{}: unexpected {} text {:?}", page.path(), element, text)
            }
            ParseError::MissingIndicator { index, available } => {
                write!(f, "indicator {} requested, status page lists {}", index, available)
            }
        }
    }
}

impl std::error::Error for ParseError {}

/// One row of the names page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameRecord {
    pub field_name: String,
    pub device_id: u32,
    /// First word of the row label, lower-cased.
    pub type_token: String,
    pub raw_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AboutRecord {
    pub model: String,
    pub name: String,
    pub manufacturer: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRecord {
    pub indicators: Vec<String>,
}

impl StatusRecord {
    /// Indicator `index` decoded as on/off.
    pub fn indicator(&self, index: u32) -> Result<bool, ParseError> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.indicators.get(i))
            .map(|v| v == "1")
            .ok_or(ParseError::MissingIndicator {
                index,
                available: self.indicators.len(),
            })
    }
}

fn selector(css: &str) -> Result<Selector, ParseError> {
    Selector::parse(css).map_err(|e| ParseError::Selector(format!("{}: {:?}", css, e)))
}

fn first<'a>(doc: &'a Html, page: Page, css: &'static str) -> Result<ElementRef<'a>, ParseError> {
    doc.select(&selector(css)?)
        .next()
        .ok_or(ParseError::MissingElement { page, element: css })
}

fn text_of(el: ElementRef<'_>) -> String {
    // Text nodes are concatenated as rendered; inline tags add no spaces.
    el.text().collect::<String>().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Positional id from a form field name: `name[12]` or `name12`.
pub fn parse_field_id(field: &str) -> Option<u32> {
    let field = field.trim();
    let digits = match field.strip_suffix(']') {
        Some(rest) => &rest[rest.rfind('[')? + 1..],
        None => &field[field.trim_end_matches(|c: char| c.is_ascii_digit()).len()..],
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

pub fn parse_names(html: &str) -> Result<Vec<NameRecord>, ParseError> {
    let doc = Html::parse_document(html);
    let content = first(&doc, Page::Names, "div#content")?;
    let rows = selector("p:not([class])")?;
    let input = selector("input")?;

    let mut records = Vec::new();
    for row in content.select(&rows) {
        let field = row.select(&input).next().ok_or(ParseError::MissingElement {
            page: Page::Names,
            element: "input",
        })?;
        let field_name = field.value().attr("name").ok_or(ParseError::MissingAttribute {
            page: Page::Names,
            attribute: "name",
        })?;
        let device_id = parse_field_id(field_name).ok_or_else(|| ParseError::InvalidFieldName(field_name.to_string()))?;
        let type_token = text_of(row)
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_lowercase();

        records.push(NameRecord {
            field_name: field_name.to_string(),
            device_id,
            type_token,
            raw_name: field.value().attr("value").unwrap_or_default().to_string(),
        });
    }
    trace!("names page: {} row(s)", records.len());

    Ok(records)
}

pub fn parse_about(html: &str) -> Result<AboutRecord, ParseError> {
    let doc = Html::parse_document(html);
    let model = text_of(first(&doc, Page::About, "h1")?);
    let name = text_of(first(&doc, Page::About, "h2")?);

    let footer = text_of(first(&doc, Page::About, "div#footer")?);
    let tokens = footer.split_whitespace().collect::<Vec<_>>();
    if tokens.len() < 2 {
        return Err(ParseError::MalformedText {
            page: Page::About,
            element: "div#footer",
            text: footer,
        });
    }
    let manufacturer = tokens[tokens.len() - 2..].join(" ");

    let paragraph = text_of(first(&doc, Page::About, "p")?);
    let version = match paragraph.split_once(": ") {
        Some((_, v)) if !v.trim().is_empty() => v.trim().to_string(),
        _ => {
            return Err(ParseError::MalformedText {
                page: Page::About,
                element: "p",
                text: paragraph,
            });
        }
    };

    Ok(AboutRecord {
        model,
        name,
        manufacturer,
        version,
    })
}

pub fn parse_status(html: &str) -> Result<StatusRecord, ParseError> {
    let doc = Html::parse_document(html);
    let container = first(&doc, Page::Status, "#leds")?;
    let led = selector(".led")?;
    let indicators = container.select(&led).map(text_of).collect::<Vec<_>>();
    trace!("status page: indicators {:?}", indicators);

    Ok(StatusRecord { indicators })
}
