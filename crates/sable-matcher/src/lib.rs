//! Match expression parsing for BSON filter documents.
//!
//! Translates a document-shaped query predicate into a typed
//! [`Expression`] tree that downstream evaluators apply to candidate
//! documents. Field-centric predicates (`{age: {$gt: 21}}`), logical
//! combinators (`{$or: [...]}`) and positional operators (`$elemMatch`,
//! `$all`, `$regex`/`$options`, `$mod`, `$type`) all parse into one
//! closed node set. `$where`, `$text` and the geo operators delegate to
//! sub-parsers installed once at startup; without them those operators
//! parse to errors.
//!
//! ```
//! use bson::doc;
//! use sable_matcher::{parse_filter, Expression};
//!
//! let filter = doc! { "age": { "$gte": 21 }, "name": { "$regex": "^jo", "$options": "i" } };
//! let expr = parse_filter(&filter).unwrap();
//! assert!(matches!(expr, Expression::And(_)));
//! ```

mod callbacks;
mod error;
mod expression;
mod operator;
mod parse_filter;

pub use bson::{Bson, Document};
pub use callbacks::{
    install_geo_parser, install_text_parser, install_where_parser, GeoParser, TextParser,
    WhereParser,
};
pub use error::ParseError;
pub use expression::{type_alias_code, ArrayFilterEntries, Expression, RegexEntry};
pub use operator::Operator;
pub use parse_filter::{parse_filter, MAX_TREE_DEPTH};
