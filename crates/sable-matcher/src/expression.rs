use bson::spec::ElementType;
use bson::{Bson, Document};

/// A parsed match expression tree.
///
/// Borrows field names and values directly from the filter document that
/// was parsed; the lifetime `'a` is tied to that `Document`. Logical nodes
/// own their children and carry no field path of their own; leaf
/// predicates carry the path they were written under. Leaves created
/// inside an `ElemMatchValue` have empty paths and apply to each array
/// element's scalar value.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression<'a> {
    // ── Logical ─────────────────────────────────────────────────
    And(Vec<Expression<'a>>),
    Or(Vec<Expression<'a>>),
    Nor(Vec<Expression<'a>>),
    /// Exactly one child. `$ne` and `$exists: false` are expressed as
    /// `Not(Eq)` and `Not(Exists)`; there is no standalone negated leaf.
    Not(Box<Expression<'a>>),

    // ── Comparisons ─────────────────────────────────────────────
    Eq(&'a str, &'a Bson),
    Lt(&'a str, &'a Bson),
    Lte(&'a str, &'a Bson),
    Gt(&'a str, &'a Bson),
    Gte(&'a str, &'a Bson),

    // ── Field predicates ────────────────────────────────────────
    In(&'a str, ArrayFilterEntries<'a>),
    Regex {
        path: &'a str,
        pattern: &'a str,
        options: &'a str,
    },
    Exists(&'a str),
    /// BSON element type code (`ElementType as i32`); `-1` matches no
    /// type at all.
    Type(&'a str, i32),
    Mod {
        path: &'a str,
        divisor: i32,
        remainder: i32,
    },
    /// Matches arrays of exactly this length; `-1` matches nothing.
    Size(&'a str, i32),

    // ── Array predicates ────────────────────────────────────────
    ElemMatchValue(&'a str, Vec<Expression<'a>>),
    ElemMatchObject(&'a str, Box<Expression<'a>>),

    // ── Sentinels ───────────────────────────────────────────────
    Atomic,
    AlwaysFalse,

    // ── Plug-in leaves (built by installed sub-parsers) ─────────
    Where {
        code: &'a str,
    },
    Text {
        query: &'a str,
        language: Option<&'a str>,
    },
    GeoNear {
        path: &'a str,
        predicate: &'a Document,
    },
    GeoWithin {
        path: &'a str,
        predicate: &'a Document,
    },
    GeoIntersects {
        path: &'a str,
        predicate: &'a Document,
    },
}

impl<'a> Expression<'a> {
    /// The field path this node applies to, if it is a pathed leaf.
    pub fn path(&self) -> Option<&'a str> {
        match self {
            Expression::Eq(path, _)
            | Expression::Lt(path, _)
            | Expression::Lte(path, _)
            | Expression::Gt(path, _)
            | Expression::Gte(path, _)
            | Expression::In(path, _)
            | Expression::Exists(path)
            | Expression::Type(path, _)
            | Expression::Size(path, _)
            | Expression::ElemMatchValue(path, _)
            | Expression::ElemMatchObject(path, _) => Some(path),
            Expression::Regex { path, .. }
            | Expression::Mod { path, .. }
            | Expression::GeoNear { path, .. }
            | Expression::GeoWithin { path, .. }
            | Expression::GeoIntersects { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// Entries collected from a `$in`/`$nin` array: plain equality values and
/// regex entries, kept in separate sets. Semantically a set — duplicates
/// in the input are accepted and do not affect match outcome.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArrayFilterEntries<'a> {
    pub equalities: Vec<&'a Bson>,
    pub regexes: Vec<RegexEntry<'a>>,
}

/// A regex inside a `$in`/`$nin` array. Applies to the value under the
/// enclosing `In` node's path, so it carries none of its own.
#[derive(Debug, Clone, PartialEq)]
pub struct RegexEntry<'a> {
    pub pattern: &'a str,
    pub options: &'a str,
}

/// Resolve a `$type` string alias to its BSON element type code.
///
/// Aliases are case-sensitive and spelled exactly as the wire protocol
/// spells them; `"number"` resolves to the Double code.
pub fn type_alias_code(alias: &str) -> Option<i32> {
    let t = match alias {
        "double" | "number" => ElementType::Double,
        "string" => ElementType::String,
        "object" => ElementType::EmbeddedDocument,
        "array" => ElementType::Array,
        "binData" => ElementType::Binary,
        "undefined" => ElementType::Undefined,
        "objectId" => ElementType::ObjectId,
        "bool" => ElementType::Boolean,
        "date" => ElementType::DateTime,
        "null" => ElementType::Null,
        "regex" => ElementType::RegularExpression,
        "dbPointer" => ElementType::DbPointer,
        "javascript" => ElementType::JavaScriptCode,
        "symbol" => ElementType::Symbol,
        "javascriptWithScope" => ElementType::JavaScriptCodeWithScope,
        "int" => ElementType::Int32,
        "timestamp" => ElementType::Timestamp,
        "long" => ElementType::Int64,
        "minKey" => ElementType::MinKey,
        "maxKey" => ElementType::MaxKey,
        _ => return None,
    };
    Some(t as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_codes_match_element_types() {
        assert_eq!(type_alias_code("string"), Some(ElementType::String as i32));
        assert_eq!(
            type_alias_code("object"),
            Some(ElementType::EmbeddedDocument as i32)
        );
        assert_eq!(type_alias_code("int"), Some(ElementType::Int32 as i32));
        assert_eq!(type_alias_code("long"), Some(ElementType::Int64 as i32));
        assert_eq!(type_alias_code("number"), Some(ElementType::Double as i32));
        assert_eq!(type_alias_code("minKey"), Some(ElementType::MinKey as i32));
        assert_eq!(type_alias_code("maxKey"), Some(ElementType::MaxKey as i32));
    }

    #[test]
    fn aliases_are_case_sensitive() {
        assert_eq!(type_alias_code("String"), None);
        assert_eq!(type_alias_code("OBJECT"), None);
        assert_eq!(type_alias_code("minkey"), None);
    }

    #[test]
    fn pathed_leaves_report_their_path() {
        let v = Bson::Int32(1);
        assert_eq!(Expression::Eq("a.b", &v).path(), Some("a.b"));
        assert_eq!(Expression::Exists("x").path(), Some("x"));
        assert_eq!(Expression::And(vec![]).path(), None);
        assert_eq!(Expression::Atomic.path(), None);
    }
}
