/// Operator code for a `$`-prefixed key inside a field's sub-document.
///
/// The parser resolves each key through [`Operator::lookup`] once and
/// dispatches on the code instead of repeating string comparisons. `$not`
/// and `$where` are deliberately absent: the dispatcher matches them by
/// name before consulting the table, so they never reach it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Lt,
    Lte,
    Gt,
    Gte,
    Ne,
    In,
    Nin,
    Size,
    Exists,
    Type,
    Mod,
    Options,
    Regex,
    ElemMatch,
    All,
    Within,
    GeoIntersects,
    Near,
}

impl Operator {
    /// Map a field name to its operator code. Returns `None` for anything
    /// that is not a recognized operator key.
    pub fn lookup(key: &str) -> Option<Operator> {
        let op = match key {
            "$eq" => Operator::Eq,
            "$lt" => Operator::Lt,
            "$lte" => Operator::Lte,
            "$gt" => Operator::Gt,
            "$gte" => Operator::Gte,
            "$ne" => Operator::Ne,
            "$in" => Operator::In,
            "$nin" => Operator::Nin,
            "$size" => Operator::Size,
            "$exists" => Operator::Exists,
            "$type" => Operator::Type,
            "$mod" => Operator::Mod,
            "$options" => Operator::Options,
            "$regex" => Operator::Regex,
            "$elemMatch" => Operator::ElemMatch,
            "$all" => Operator::All,
            "$within" | "$geoWithin" => Operator::Within,
            "$geoIntersects" => Operator::GeoIntersects,
            "$near" | "$nearSphere" | "$geoNear" => Operator::Near,
            _ => return None,
        };
        Some(op)
    }
}
