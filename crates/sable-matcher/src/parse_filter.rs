//! Recursive descent parser from BSON filter documents to [`Expression`]
//! trees.
//!
//! Three mutually recursive entry points: the top-level document
//! (`parse_document`), a field's expression sub-document (`parse_sub`) and
//! a single operator element within it (`parse_sub_field`). The top-level
//! document is an implicit AND of its entries; a one-child AND collapses
//! to the child. Recursion depth is bounded by [`MAX_TREE_DEPTH`], so a
//! hostile filter gets a `BadValue` error instead of a stack overflow.

use bson::{Bson, Document};

use crate::callbacks;
use crate::error::ParseError;
use crate::expression::{type_alias_code, ArrayFilterEntries, Expression, RegexEntry};
use crate::operator::Operator;

/// Maximum nesting depth of a filter document.
pub const MAX_TREE_DEPTH: usize = 100;

/// Parse a BSON filter document into an [`Expression`] tree.
///
/// Borrows field names and values directly from `doc`; only the `Vec`s
/// holding logical children are allocated. Follows the query semantics:
///
/// - the top-level document is an implicit AND of all entries
/// - `{ "field": value }` is implicit `$eq`
/// - `{ "field": { "$gt": v, "$lt": w } }` uses operator sub-documents
/// - `{ "$or": [...] }` / `{ "$and": [...] }` / `{ "$nor": [...] }` for
///   explicit logical combinators
/// - `$where`, `$text` and the geo operators delegate to the sub-parsers
///   installed through [`crate::callbacks`]
pub fn parse_filter(doc: &Document) -> Result<Expression<'_>, ParseError> {
    tracing::trace!(filter = %doc, "parsing filter document");
    parse_document(doc, 0)
}

fn parse_document(doc: &Document, level: usize) -> Result<Expression<'_>, ParseError> {
    if level > MAX_TREE_DEPTH {
        return Err(ParseError::BadValue(format!(
            "exceeded maximum query tree depth of {MAX_TREE_DEPTH} at {doc}"
        )));
    }

    let top_level = level == 0;
    let level = level + 1;

    let mut children: Vec<Expression<'_>> = Vec::new();

    for (key, value) in doc {
        let key = key.as_str();
        if let Some(rest) = key.strip_prefix('$') {
            match rest {
                "or" => children.push(Expression::Or(parse_tree_list(key, value, level)?)),
                "and" => children.push(Expression::And(parse_tree_list(key, value, level)?)),
                "nor" => children.push(Expression::Nor(parse_tree_list(key, value, level)?)),
                "atomic" | "isolated" => {
                    if !top_level {
                        return Err(ParseError::BadValue(
                            "$atomic/$isolated has to be at the top level".into(),
                        ));
                    }
                    if is_truthy(value) {
                        children.push(Expression::Atomic);
                    }
                }
                "where" => children.push(callbacks::parse_where(value)?),
                "text" => match value {
                    Bson::Document(query) => children.push(callbacks::parse_text(query)?),
                    _ => return Err(ParseError::BadValue("$text expects an object".into())),
                },
                "comment" => {}
                "ref" | "id" | "db" => {
                    // DBRef-style top-level queries: plain equality on the
                    // literal `$`-prefixed field name.
                    children.push(Expression::Eq(key, value));
                }
                _ => {
                    return Err(ParseError::BadValue(format!(
                        "unknown top level operator: {key}"
                    )));
                }
            }
            continue;
        }

        if let Bson::Document(sub) = value {
            if is_expression_document(value, false) {
                parse_sub(key, sub, &mut children, level)?;
                continue;
            }
        }

        if let Bson::RegularExpression(re) = value {
            children.push(Expression::Regex {
                path: key,
                pattern: &re.pattern,
                options: &re.options,
            });
            continue;
        }

        children.push(Expression::Eq(key, value));
    }

    if children.len() == 1 {
        return Ok(children.pop().unwrap());
    }
    Ok(Expression::And(children))
}

/// Parse a `$or`/`$and`/`$nor` array; every entry is a full nested
/// predicate document.
fn parse_tree_list<'a>(
    op: &str,
    value: &'a Bson,
    level: usize,
) -> Result<Vec<Expression<'a>>, ParseError> {
    let items = match value {
        Bson::Array(items) => items,
        _ => return Err(ParseError::BadValue(format!("{op} needs an array"))),
    };

    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Bson::Document(sub) => out.push(parse_document(sub, level)?),
            _ => {
                return Err(ParseError::BadValue(
                    "$or/$and/$nor entries need to be full objects".into(),
                ));
            }
        }
    }
    Ok(out)
}

/// Parse an expression document like `{$gt: 3, $lt: 10}` for the field
/// `name`, appending each resulting predicate to `and_so_far`.
fn parse_sub<'a>(
    name: &'a str,
    sub: &'a Document,
    and_so_far: &mut Vec<Expression<'a>>,
    level: usize,
) -> Result<(), ParseError> {
    if level > MAX_TREE_DEPTH {
        return Err(ParseError::BadValue(format!(
            "exceeded maximum query tree depth of {MAX_TREE_DEPTH} at {sub}"
        )));
    }
    let level = level + 1;

    // Geo predicates combine `$near` with auxiliary keys that have no
    // standalone meaning ($maxDistance without $near), so the whole
    // sub-document goes to the geo parser before any per-key dispatch.
    if let Some((first_key, first_value)) = sub.iter().next() {
        if matches!(first_value, Bson::Document(_) | Bson::Array(_)) && is_geo_key(first_key) {
            and_so_far.push(callbacks::parse_geo(name, Operator::lookup(first_key), sub)?);
            return Ok(());
        }
    }

    for (key, value) in sub {
        if let Some(expr) = parse_sub_field(sub, name, key.as_str(), value, level)? {
            and_so_far.push(expr);
        }
    }
    Ok(())
}

fn is_geo_key(key: &str) -> bool {
    matches!(
        key,
        "$near" | "$nearSphere" | "$geoNear" | "$maxDistance" | "$minDistance"
    )
}

/// Resolve a single `{$op: value}` element. `sub` is the enclosing
/// sub-document, needed for `$options`/`$regex` coordination and for the
/// geo operators, which consume the whole document. Returns `Ok(None)`
/// for a `$options` with a `$regex` sibling, which emits nothing itself.
fn parse_sub_field<'a>(
    sub: &'a Document,
    name: &'a str,
    key: &'a str,
    value: &'a Bson,
    level: usize,
) -> Result<Option<Expression<'a>>, ParseError> {
    if key == "$not" {
        return parse_not(name, value, level).map(Some);
    }

    let op = match Operator::lookup(key) {
        Some(op) => op,
        None => {
            // $where works on whole top-level documents only.
            if key == "$where" {
                return Err(ParseError::BadValue(
                    "$where cannot be applied to a field".into(),
                ));
            }
            return Err(ParseError::BadValue(format!("unknown operator: {key}")));
        }
    };

    let expr = match op {
        Operator::Eq | Operator::Lt | Operator::Lte | Operator::Gt | Operator::Gte => {
            parse_comparison(name, value, op)?
        }
        Operator::Ne => {
            // $ne is the negation of an equality, but that does not make
            // $ne of a regex legal.
            if matches!(value, Bson::RegularExpression(_)) {
                return Err(ParseError::BadValue("Can't have regex as arg to $ne.".into()));
            }
            Expression::Not(Box::new(Expression::Eq(name, value)))
        }
        Operator::In => {
            let items = expect_array(value, "$in needs an array")?;
            Expression::In(name, parse_array_filter_entries(items)?)
        }
        Operator::Nin => {
            let items = expect_array(value, "$nin needs an array")?;
            Expression::Not(Box::new(Expression::In(
                name,
                parse_array_filter_entries(items)?,
            )))
        }
        Operator::Size => Expression::Size(name, parse_size(value)?),
        Operator::Exists => {
            if is_truthy(value) {
                Expression::Exists(name)
            } else {
                Expression::Not(Box::new(Expression::Exists(name)))
            }
        }
        Operator::Type => parse_type(name, value)?,
        Operator::Mod => parse_mod(name, value)?,
        Operator::Options => {
            // $options can come before or after its $regex, so the
            // sibling scan covers the whole enclosing sub-document.
            if sub.keys().any(|k| Operator::lookup(k) == Some(Operator::Regex)) {
                return Ok(None);
            }
            return Err(ParseError::BadValue("$options needs a $regex".into()));
        }
        Operator::Regex => parse_regex_document(name, sub)?,
        Operator::ElemMatch => parse_elem_match(name, value, level)?,
        Operator::All => parse_all(name, value, level)?,
        Operator::Within | Operator::GeoIntersects => callbacks::parse_geo(name, Some(op), sub)?,
        Operator::Near => {
            return Err(ParseError::BadValue(format!("not handled: {key}")));
        }
    };

    Ok(Some(expr))
}

/// Non-equality comparisons cannot take a regex argument
/// (e.g. `{a: {$gt: /b/}}` is illegal).
fn parse_comparison<'a>(
    name: &'a str,
    value: &'a Bson,
    op: Operator,
) -> Result<Expression<'a>, ParseError> {
    if op != Operator::Eq && matches!(value, Bson::RegularExpression(_)) {
        return Err(ParseError::BadValue(format!(
            "Can't have RegEx as arg to predicate over field '{name}'."
        )));
    }

    Ok(match op {
        Operator::Eq => Expression::Eq(name, value),
        Operator::Lt => Expression::Lt(name, value),
        Operator::Lte => Expression::Lte(name, value),
        Operator::Gt => Expression::Gt(name, value),
        Operator::Gte => Expression::Gte(name, value),
        _ => unreachable!(),
    })
}

/// `{field: {$not: arg}}`. The argument is either a regex or a non-empty
/// expression document; the parsed body becomes the single `Not` child.
fn parse_not<'a>(
    name: &'a str,
    value: &'a Bson,
    level: usize,
) -> Result<Expression<'a>, ParseError> {
    if let Bson::RegularExpression(re) = value {
        return Ok(Expression::Not(Box::new(Expression::Regex {
            path: name,
            pattern: &re.pattern,
            options: &re.options,
        })));
    }

    let not_doc = match value {
        Bson::Document(doc) => doc,
        _ => return Err(ParseError::BadValue("$not needs a regex or a document".into())),
    };
    if not_doc.is_empty() {
        return Err(ParseError::BadValue("$not cannot be empty".into()));
    }

    // Logical operators inside $not fail in the dispatcher as unknown
    // operators; everything else parses like a normal sub-document body.
    let mut the_and = Vec::new();
    parse_sub(name, not_doc, &mut the_and, level)?;
    Ok(Expression::Not(Box::new(Expression::And(the_and))))
}

/// `$size` keeps some historical quirks: strings mean zero, negative
/// counts and inexact doubles mean match-nothing.
fn parse_size(value: &Bson) -> Result<i32, ParseError> {
    let size = match value {
        Bson::String(_) => 0,
        Bson::Int32(n) => {
            if *n < 0 {
                -1
            } else {
                *n
            }
        }
        Bson::Int64(n) => {
            if *n < 0 {
                -1
            } else {
                *n as i32
            }
        }
        Bson::Double(d) => {
            let n = *d as i32;
            // exact numeric match required, so 2.5 matches no length
            if n as f64 == *d && n >= 0 {
                n
            } else {
                -1
            }
        }
        _ => return Err(ParseError::BadValue("$size needs a number".into())),
    };
    Ok(size)
}

/// `$type` takes a numeric type code or a string alias. A non-Int32
/// number that is not exactly integral becomes `-1`, which matches no
/// type at all.
fn parse_type<'a>(name: &'a str, value: &'a Bson) -> Result<Expression<'a>, ParseError> {
    let code = match value {
        Bson::Int32(n) => *n,
        Bson::Int64(n) => {
            let truncated = *n as i32;
            if truncated as i64 == *n {
                truncated
            } else {
                -1
            }
        }
        Bson::Double(d) => {
            let truncated = *d as i32;
            if truncated as f64 == *d {
                truncated
            } else {
                -1
            }
        }
        Bson::String(alias) => match type_alias_code(alias) {
            Some(code) => code,
            None => {
                return Err(ParseError::BadValue(format!(
                    "unknown string alias for $type: {alias}"
                )));
            }
        },
        _ => {
            return Err(ParseError::TypeMismatch(
                "argument to $type is not a number or a string".into(),
            ));
        }
    };
    Ok(Expression::Type(name, code))
}

/// `$mod` takes exactly `[divisor, remainder]`, both numbers; the node
/// stores their 32-bit integer projections.
fn parse_mod<'a>(name: &'a str, value: &'a Bson) -> Result<Expression<'a>, ParseError> {
    let items = expect_array(value, "malformed mod, needs to be an array")?;
    let mut iter = items.iter();

    let divisor = match iter.next() {
        Some(d) => number_to_int(d).ok_or_else(|| {
            ParseError::BadValue("malformed mod, divisor not a number".into())
        })?,
        None => return Err(ParseError::BadValue("malformed mod, not enough elements".into())),
    };
    let remainder = match iter.next() {
        Some(r) => number_to_int(r).ok_or_else(|| {
            ParseError::BadValue("malformed mod, remainder not a number".into())
        })?,
        None => return Err(ParseError::BadValue("malformed mod, not enough elements".into())),
    };
    if iter.next().is_some() {
        return Err(ParseError::BadValue("malformed mod, too many elements".into()));
    }

    Ok(Expression::Mod {
        path: name,
        divisor,
        remainder,
    })
}

/// Assemble a `Regex` leaf from a sub-document holding `$regex` and
/// optionally `$options`, in either order. Other keys are ignored here;
/// the dispatcher parses them separately.
fn parse_regex_document<'a>(
    name: &'a str,
    sub: &'a Document,
) -> Result<Expression<'a>, ParseError> {
    let mut pattern = "";
    let mut options = "";

    for (key, value) in sub {
        match Operator::lookup(key) {
            Some(Operator::Regex) => match value {
                Bson::String(s) => pattern = s.as_str(),
                Bson::RegularExpression(re) => {
                    pattern = &re.pattern;
                    options = &re.options;
                }
                _ => return Err(ParseError::BadValue("$regex has to be a string".into())),
            },
            Some(Operator::Options) => match value {
                Bson::String(s) => options = s.as_str(),
                _ => return Err(ParseError::BadValue("$options has to be a string".into())),
            },
            _ => {}
        }
    }

    Ok(Expression::Regex {
        path: name,
        pattern,
        options,
    })
}

/// Populate `$in`/`$nin` entries. Expression documents are rejected;
/// DBRef-shaped documents count as plain equality values.
fn parse_array_filter_entries<'a>(
    items: &'a [Bson],
) -> Result<ArrayFilterEntries<'a>, ParseError> {
    let mut entries = ArrayFilterEntries::default();
    for item in items {
        if is_expression_document(item, false) {
            return Err(ParseError::BadValue("cannot nest $ under $in".into()));
        }
        match item {
            Bson::RegularExpression(re) => entries.regexes.push(RegexEntry {
                pattern: &re.pattern,
                options: &re.options,
            }),
            _ => entries.equalities.push(item),
        }
    }
    Ok(entries)
}

/// `$elemMatch` has two dialects: the value form, whose children all
/// apply to the array element itself, and the object form, whose single
/// child matches the element as a document.
fn parse_elem_match<'a>(
    name: &'a str,
    value: &'a Bson,
    level: usize,
) -> Result<Expression<'a>, ParseError> {
    let obj = match value {
        Bson::Document(doc) => doc,
        _ => return Err(ParseError::BadValue("$elemMatch needs an Object".into())),
    };

    // The value dialect applies when the argument is an expression
    // document (incomplete DBRef shapes count as DBRefs here) whose first
    // key is not a logical operator or $where: children of those are
    // initialized with field names of their own.
    let is_elem_match_value = is_expression_document(value, true)
        && !matches!(
            obj.keys().next().map(String::as_str).unwrap_or(""),
            "$and" | "$nor" | "$or" | "$where"
        );

    if is_elem_match_value {
        let mut the_and = Vec::new();
        parse_sub("", obj, &mut the_and, level)?;
        return Ok(Expression::ElemMatchValue(name, the_and));
    }

    // Object dialect. A DBRef-shaped document lands here because it may
    // carry ordinary fields alongside $ref/$id/$db.
    let sub = parse_document(obj, level)?;

    // $where applies to top-level documents, not array elements.
    if has_where_node(&sub) {
        return Err(ParseError::BadValue(
            "$elemMatch cannot contain $where expression".into(),
        ));
    }

    Ok(Expression::ElemMatchObject(name, Box::new(sub)))
}

/// `$all` has two dialects as well: an array of `$elemMatch` documents,
/// which must be shape-consistent, or an array of plain values and
/// regexes. An empty `$all` matches nothing.
fn parse_all<'a>(
    name: &'a str,
    value: &'a Bson,
    level: usize,
) -> Result<Expression<'a>, ParseError> {
    let items = expect_array(value, "$all needs an array")?;

    let first_is_elem_match = match items.first() {
        Some(Bson::Document(doc)) => doc.keys().next().map(String::as_str) == Some("$elemMatch"),
        _ => false,
    };

    if first_is_elem_match {
        let mut children = Vec::with_capacity(items.len());
        for item in items {
            let doc = match item {
                Bson::Document(doc) => doc,
                _ => {
                    return Err(ParseError::BadValue(
                        "$all/$elemMatch has to be consistent".into(),
                    ));
                }
            };
            match doc.iter().next() {
                Some((key, inner)) if key == "$elemMatch" => {
                    children.push(parse_elem_match(name, inner, level)?);
                }
                _ => {
                    return Err(ParseError::BadValue(
                        "$all/$elemMatch has to be consistent".into(),
                    ));
                }
            }
        }
        return Ok(Expression::And(children));
    }

    let mut children = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Bson::RegularExpression(re) => children.push(Expression::Regex {
                path: name,
                pattern: &re.pattern,
                options: &re.options,
            }),
            Bson::Document(doc) => {
                let first_is_operator = doc
                    .keys()
                    .next()
                    .map(|k| Operator::lookup(k).is_some())
                    .unwrap_or(false);
                if first_is_operator {
                    return Err(ParseError::BadValue("no $ expressions in $all".into()));
                }
                children.push(Expression::Eq(name, item));
            }
            _ => children.push(Expression::Eq(name, item)),
        }
    }

    if children.is_empty() {
        return Ok(Expression::AlwaysFalse);
    }
    Ok(Expression::And(children))
}

/// True iff the value is a non-empty document whose first field name
/// starts with `$` and which is not a DBRef. Field names decide; field
/// types are not validated here.
fn is_expression_document(value: &Bson, allow_incomplete_dbref: bool) -> bool {
    match value {
        Bson::Document(doc) => match doc.keys().next() {
            Some(first) if first.starts_with('$') => {
                !is_dbref_document(doc, allow_incomplete_dbref)
            }
            _ => false,
        },
        _ => false,
    }
}

/// A document is a DBRef iff it contains both `$ref` and `$id`, or any of
/// `$ref`/`$id`/`$db` when incomplete DBRefs are allowed.
fn is_dbref_document(doc: &Document, allow_incomplete: bool) -> bool {
    let mut has_ref = false;
    let mut has_id = false;
    let mut has_db = false;

    for key in doc.keys() {
        match key.as_str() {
            "$ref" => has_ref = true,
            "$id" => has_id = true,
            "$db" => has_db = true,
            _ => {}
        }
        if has_ref && has_id {
            break;
        }
    }

    if allow_incomplete {
        has_ref || has_id || has_db
    } else {
        has_ref && has_id
    }
}

/// Returns true if the subtree contains a `Where` node anywhere.
fn has_where_node(expr: &Expression<'_>) -> bool {
    match expr {
        Expression::Where { .. } => true,
        Expression::And(children) | Expression::Or(children) | Expression::Nor(children) => {
            children.iter().any(has_where_node)
        }
        Expression::Not(child) | Expression::ElemMatchObject(_, child) => has_where_node(child),
        Expression::ElemMatchValue(_, children) => children.iter().any(has_where_node),
        _ => false,
    }
}

fn expect_array<'a>(value: &'a Bson, msg: &str) -> Result<&'a [Bson], ParseError> {
    match value {
        Bson::Array(items) => Ok(items),
        _ => Err(ParseError::BadValue(msg.into())),
    }
}

/// BSON truthiness: numbers are true when non-zero, booleans are
/// themselves, null and undefined are false, everything else is true.
fn is_truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Int32(n) => *n != 0,
        Bson::Int64(n) => *n != 0,
        Bson::Double(d) => *d != 0.0,
        Bson::Null | Bson::Undefined => false,
        _ => true,
    }
}

/// 32-bit integer projection of a numeric value, `None` for non-numbers.
fn number_to_int(value: &Bson) -> Option<i32> {
    match value {
        Bson::Int32(n) => Some(*n),
        Bson::Int64(n) => Some(*n as i32),
        Bson::Double(d) => Some(*d as i32),
        _ => None,
    }
}
