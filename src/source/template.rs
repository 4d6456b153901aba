use std::fmt;

use crate::error::ConfigError;
use crate::geo::TileAddress;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Zoom,
    Row,
    Col,
}

const TOKENS: [(&str, Segment); 6] = [
    ("%(zoom)d", Segment::Zoom),
    ("%(row)d", Segment::Row),
    ("%(col)d", Segment::Col),
    ("{z}", Segment::Zoom),
    ("{y}", Segment::Row),
    ("{x}", Segment::Col),
];

/// Tile URL template.
///
/// Placeholders are `%(zoom)d`, `%(row)d` and `%(col)d`, or the XYZ forms
/// `{z}`, `{y}` (row) and `{x}` (col). `%%` is a literal percent sign. Each of
/// the three coordinates must appear at least once.
///
/// ```
/// use maptile_cache::geo::TileAddress;
/// use maptile_cache::source::UrlTemplate;
///
/// let template = UrlTemplate::parse("/tiles/%(zoom)d/%(col)d/%(row)d.png").unwrap();
/// assert_eq!(template.render(TileAddress::new(3, 2, 1)), "/tiles/3/1/2.png");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl UrlTemplate {
    pub fn parse(template: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidUrlTemplate {
            template: template.to_string(),
            reason: reason.to_string(),
        };

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = template;

        'scan: while let Some(c) = rest.chars().next() {
            if c == '%' || c == '{' {
                for (token, segment) in &TOKENS {
                    if let Some(after) = rest.strip_prefix(token) {
                        if !literal.is_empty() {
                            segments.push(Segment::Literal(std::mem::take(&mut literal)));
                        }
                        segments.push(segment.clone());
                        rest = after;
                        continue 'scan;
                    }
                }
                if let Some(after) = rest.strip_prefix("%%") {
                    literal.push('%');
                    rest = after;
                    continue;
                }
                if c == '%' {
                    return Err(invalid("unsupported '%' placeholder"));
                }
            }
            literal.push(c);
            rest = &rest[c.len_utf8()..];
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        for (required, name) in [
            (Segment::Zoom, "zoom"),
            (Segment::Row, "row"),
            (Segment::Col, "col"),
        ] {
            if !segments.contains(&required) {
                return Err(invalid(&format!("missing {name} placeholder")));
            }
        }

        Ok(Self {
            raw: template.to_string(),
            segments,
        })
    }

    /// Substitute an address into the template.
    pub fn render(&self, address: TileAddress) -> String {
        let mut out = String::with_capacity(self.raw.len() + 8);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Zoom => out.push_str(&address.zoom.to_string()),
                Segment::Row => out.push_str(&address.row.to_string()),
                Segment::Col => out.push_str(&address.col.to_string()),
            }
        }
        out
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for UrlTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
