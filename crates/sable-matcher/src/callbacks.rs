//! Plug-in seams for the sub-parsers that may not be linked in.
//!
//! `$where`, `$text` and the geo operators are parsed by callbacks
//! installed once at process startup; each slot defaults to an
//! error-returning stub, so a build without the corresponding subsystem
//! rejects those operators instead of failing at link time. The slots
//! are process-wide and read-only after installation.

use std::sync::OnceLock;

use bson::{Bson, Document};

use crate::error::ParseError;
use crate::expression::Expression;
use crate::operator::Operator;

/// Parses the value of a top-level `$where` element.
pub type WhereParser = for<'a> fn(&'a Bson) -> Result<Expression<'a>, ParseError>;

/// Parses the document argument of a top-level `$text` element.
pub type TextParser = for<'a> fn(&'a Document) -> Result<Expression<'a>, ParseError>;

/// Parses a whole geo sub-document for the named field. The operator code
/// is the lookup result for the key that triggered the dispatch; `None`
/// when that key was an auxiliary one (`$maxDistance`, `$minDistance`).
pub type GeoParser =
    for<'a> fn(&'a str, Option<Operator>, &'a Document) -> Result<Expression<'a>, ParseError>;

static WHERE_PARSER: OnceLock<WhereParser> = OnceLock::new();
static TEXT_PARSER: OnceLock<TextParser> = OnceLock::new();
static GEO_PARSER: OnceLock<GeoParser> = OnceLock::new();

/// Install the `$where` sub-parser. The first installation wins and is
/// permanent; returns whether this call was the one that installed it.
pub fn install_where_parser(parser: WhereParser) -> bool {
    WHERE_PARSER.set(parser).is_ok()
}

/// Install the `$text` sub-parser. First installation wins.
pub fn install_text_parser(parser: TextParser) -> bool {
    TEXT_PARSER.set(parser).is_ok()
}

/// Install the geo sub-parser. First installation wins.
pub fn install_geo_parser(parser: GeoParser) -> bool {
    GEO_PARSER.set(parser).is_ok()
}

pub(crate) fn parse_where(value: &Bson) -> Result<Expression<'_>, ParseError> {
    tracing::trace!(installed = WHERE_PARSER.get().is_some(), "dispatching $where");
    let parser = WHERE_PARSER.get().copied().unwrap_or(default_parse_where as WhereParser);
    parser(value)
}

pub(crate) fn parse_text(query: &Document) -> Result<Expression<'_>, ParseError> {
    tracing::trace!(installed = TEXT_PARSER.get().is_some(), "dispatching $text");
    let parser = TEXT_PARSER.get().copied().unwrap_or(default_parse_text as TextParser);
    parser(query)
}

pub(crate) fn parse_geo<'a>(
    name: &'a str,
    op: Option<Operator>,
    sub: &'a Document,
) -> Result<Expression<'a>, ParseError> {
    tracing::trace!(
        field = name,
        installed = GEO_PARSER.get().is_some(),
        "dispatching geo predicate"
    );
    let parser = GEO_PARSER.get().copied().unwrap_or(default_parse_geo as GeoParser);
    parser(name, op, sub)
}

fn default_parse_where(_value: &Bson) -> Result<Expression<'_>, ParseError> {
    Err(ParseError::NoWhereParseContext(
        "no context for parsing $where".into(),
    ))
}

fn default_parse_text(_query: &Document) -> Result<Expression<'_>, ParseError> {
    Err(ParseError::BadValue("$text not linked in".into()))
}

fn default_parse_geo<'a>(
    _name: &'a str,
    _op: Option<Operator>,
    _sub: &'a Document,
) -> Result<Expression<'a>, ParseError> {
    Err(ParseError::BadValue("geo not linked in".into()))
}
