//! Statement classification and text assembly.
//!
//! Parameters never travel separately from the statement: each one is
//! escaped for the connection's dialect, then its `%` and `_` are prefixed
//! with a backslash, and the results are spliced into the template by a
//! printf-style pass. A template run without parameters is sent verbatim,
//! so a literal `%` only needs doubling when parameters are supplied.
//!
//! Conversions follow PHP's `sprintf`:
//!
//! | conversion | argument rendered as |
//! |---|---|
//! | `%s` | text, cut to the precision if one is given |
//! | `%d`, `%u` | signed / unsigned integer |
//! | `%b`, `%o`, `%x`, `%X` | integer in base 2, 8, 16 (two's complement for negatives) |
//! | `%c` | the ASCII character with that code; width and flags are ignored |
//! | `%f`, `%F` | fixed-point, 6 decimals unless a precision is given |
//! | `%e`, `%E` | scientific, `1.500000e+3` |
//! | `%g`, `%G` | the shorter of fixed and scientific, precision counts significant digits |
//! | `%%` | a literal `%` |
//!
//! Each may carry an `N$` argument position, then flags (`-` left-align, `+`
//! sign positive numbers, `0` or space as padding, `'c` to pad with `c`), a
//! width and a `.precision`. Numeric conversions use the leading number of
//! the escaped argument, 0 when there is none. Widths above [`MAX_WIDTH`]
//! are rejected and float precision is capped at 53 digits.

use std::borrow::Cow;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use rwsplit_core::{QueryError, QueryErrorKind, Value};

/// Largest padding width a conversion may ask for.
pub const MAX_WIDTH: usize = 1 << 20;

const MAX_FLOAT_PRECISION: usize = 53;

/// How a statement is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Read,
    Write,
}

impl StatementKind {
    /// A statement is a read exactly when its text, leading whitespace
    /// removed, starts with `SELECT` in any letter case. Nothing else about
    /// the statement is inspected.
    pub fn classify(sql: &str) -> Self {
        let head = sql.trim_start().as_bytes();
        if head
            .get(..6)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(b"SELECT"))
        {
            StatementKind::Read
        } else {
            StatementKind::Write
        }
    }

    pub fn is_read(self) -> bool {
        self == StatementKind::Read
    }
}

/// Prefix every `%` and `_` with a backslash.
pub fn escape_wildcards(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c == '%' || c == '_' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn template_error(message: impl Into<String>) -> QueryError {
    QueryError::new(QueryErrorKind::Template, message)
}

fn conversion_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?s)%(?:(?P<position>\d+)\$)?(?P<flags>(?:[-+ 0]|'.)*)(?P<width>\d+)?(?:\.(?P<precision>\d+))?(?P<conversion>.?)",
        )
        .unwrap_or_else(|e| unreachable!("conversion pattern is valid: {e}"))
    })
}

fn float_prefix_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[+-]?(?:\d+(?:\.\d*)?|\.\d+)(?:[eE][+-]?\d+)?")
            .unwrap_or_else(|e| unreachable!("float pattern is valid: {e}"))
    })
}

#[derive(Debug)]
struct Conversion {
    position: Option<usize>,
    left_align: bool,
    plus_sign: bool,
    pad_char: char,
    width: usize,
    precision: Option<usize>,
    conversion: char,
}

fn parse_number(caps: &Captures<'_>, group: &str) -> Result<Option<usize>, QueryError> {
    caps.name(group)
        .map(|m| {
            m.as_str()
                .parse()
                .map_err(|_| template_error(format!("{group} '{}' is out of range", m.as_str())))
        })
        .transpose()
}

impl Conversion {
    fn parse(caps: &Captures<'_>) -> Result<Self, QueryError> {
        let conversion = caps
            .name("conversion")
            .and_then(|m| m.as_str().chars().next())
            .ok_or_else(|| template_error("template ends inside a conversion specification"))?;
        if !matches!(
            conversion,
            '%' | 's' | 'd' | 'u' | 'b' | 'o' | 'x' | 'X' | 'c' | 'e' | 'E' | 'f' | 'F' | 'g' | 'G'
        ) {
            return Err(template_error(format!(
                "unknown conversion specifier '%{conversion}'"
            )));
        }

        let mut left_align = false;
        let mut plus_sign = false;
        let mut pad_char = ' ';
        let mut flags = caps.name("flags").map_or("", |m| m.as_str()).chars();
        while let Some(flag) = flags.next() {
            match flag {
                '-' => left_align = true,
                '+' => plus_sign = true,
                '\'' => pad_char = flags.next().unwrap_or(' '),
                other => pad_char = other,
            }
        }

        let width = parse_number(caps, "width")?.unwrap_or(0);
        if width > MAX_WIDTH {
            return Err(template_error(format!(
                "width {width} exceeds the maximum of {MAX_WIDTH}"
            )));
        }
        Ok(Self {
            position: parse_number(caps, "position")?,
            left_align,
            plus_sign,
            pad_char,
            width,
            precision: parse_number(caps, "precision")?,
            conversion,
        })
    }

    fn float_precision(&self) -> usize {
        self.precision.unwrap_or(6).min(MAX_FLOAT_PRECISION)
    }

    fn signed(&self, body: String) -> String {
        if self.plus_sign && !body.starts_with('-') {
            format!("+{body}")
        } else {
            body
        }
    }

    fn render(&self, arg: &str) -> Result<String, QueryError> {
        let body = match self.conversion {
            'd' => self.signed(leading_int(arg).to_string()),
            'u' => (leading_int(arg) as u64).to_string(),
            'b' => format!("{:b}", leading_int(arg) as u64),
            'o' => format!("{:o}", leading_int(arg) as u64),
            'x' => format!("{:x}", leading_int(arg) as u64),
            'X' => format!("{:X}", leading_int(arg) as u64),
            'c' => return character(arg),
            'e' | 'E' => self.signed(scientific(
                leading_float(arg),
                self.float_precision(),
                self.conversion == 'E',
            )),
            'f' | 'F' => self.signed(format!("{:.*}", self.float_precision(), leading_float(arg))),
            'g' | 'G' => self.signed(general(
                leading_float(arg),
                self.float_precision(),
                self.conversion == 'G',
            )),
            _ => match self.precision {
                Some(max) => arg.chars().take(max).collect(),
                None => arg.to_string(),
            },
        };
        Ok(self.pad(body))
    }

    fn pad(&self, body: String) -> String {
        let len = body.chars().count();
        if len >= self.width {
            return body;
        }
        let padding: String = std::iter::repeat_n(self.pad_char, self.width - len).collect();

        if self.left_align {
            return body + &padding;
        }
        let numeric = self.conversion != 's';
        if numeric && self.pad_char == '0' {
            if let Some(sign) = body.chars().next().filter(|c| *c == '-' || *c == '+') {
                return format!("{sign}{padding}{}", &body[1..]);
            }
        }
        padding + &body
    }
}

/// Integer value of the numeric prefix of `raw`; 0 when there is none.
fn leading_int(raw: &str) -> i64 {
    let s = raw.trim_start();
    let (negative, rest) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let magnitude = rest
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0i64, |acc, b| {
            acc.saturating_mul(10).saturating_add(i64::from(b - b'0'))
        });
    if negative { -magnitude } else { magnitude }
}

fn leading_float(raw: &str) -> f64 {
    float_prefix_pattern()
        .find(raw.trim_start())
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0.0)
}

fn character(arg: &str) -> Result<String, QueryError> {
    let code = leading_int(arg);
    u8::try_from(code)
        .ok()
        .filter(u8::is_ascii)
        .map(|b| char::from(b).to_string())
        .ok_or_else(|| template_error(format!("%c needs an ASCII code, got {code}")))
}

/// `{:e}` with the exponent written as `e+3` / `e-3`.
fn scientific(value: f64, precision: usize, upper: bool) -> String {
    let formatted = format!("{value:.precision$e}");
    let Some((mantissa, exponent)) = formatted.split_once('e') else {
        return formatted;
    };
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let sign = if exponent < 0 { '-' } else { '+' };
    let e = if upper { 'E' } else { 'e' };
    format!("{mantissa}{e}{sign}{}", exponent.unsigned_abs())
}

/// `%g`: `precision` significant digits, trailing zeros dropped.
fn general(value: f64, precision: usize, upper: bool) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    let significant = precision.max(1);
    let digits = significant - 1;
    let rounded = format!("{value:.digits$e}");
    let exponent: i64 = rounded
        .split_once('e')
        .and_then(|(_, exp)| exp.parse().ok())
        .unwrap_or(0);

    if exponent < -4 || exponent >= significant as i64 {
        let full = scientific(value, digits, upper);
        let split = full.find(['e', 'E']).unwrap_or(full.len());
        let (mantissa, tail) = full.split_at(split);
        let mantissa = trim_fraction(mantissa);
        // a bare integer mantissa keeps one decimal, as in `1.0e+25`
        if mantissa.contains('.') {
            format!("{mantissa}{tail}")
        } else {
            format!("{mantissa}.0{tail}")
        }
    } else {
        let decimals = usize::try_from(significant as i64 - 1 - exponent).unwrap_or(0);
        trim_fraction(&format!("{value:.decimals$}")).to_string()
    }
}

fn trim_fraction(number: &str) -> &str {
    if number.contains('.') {
        number.trim_end_matches('0').trim_end_matches('.')
    } else {
        number
    }
}

/// Substitute already-escaped `args` into `template`.
///
/// Every conversion consumes the next argument unless it names one with
/// `N$`. Referencing a missing argument, leaving an argument unused, or an
/// unknown conversion is a [`QueryErrorKind::Template`] error.
pub fn format_template(template: &str, args: &[String]) -> Result<String, QueryError> {
    let mut out = String::with_capacity(template.len() + args.iter().map(String::len).sum::<usize>());
    let mut used = vec![false; args.len()];
    let mut next = 0usize;
    let mut copied = 0usize;

    for caps in conversion_pattern().captures_iter(template) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        out.push_str(&template[copied..whole.start()]);
        copied = whole.end();

        let conversion = Conversion::parse(&caps)?;
        if conversion.conversion == '%' {
            out.push('%');
            continue;
        }
        let index = match conversion.position {
            Some(0) => return Err(template_error("argument positions start at 1")),
            Some(position) => position - 1,
            None => {
                next += 1;
                next - 1
            }
        };
        let arg = args.get(index).ok_or_else(|| {
            template_error(format!(
                "too few parameters: conversion {} needs parameter {} but {} were given",
                whole.as_str(),
                index + 1,
                args.len()
            ))
        })?;
        used[index] = true;
        out.push_str(&conversion.render(arg)?);
    }
    out.push_str(&template[copied..]);

    if let Some(unused) = used.iter().position(|u| !u) {
        return Err(template_error(format!(
            "too many parameters: parameter {} of {} is not referenced by the template",
            unused + 1,
            args.len()
        )));
    }
    Ok(out)
}

/// Raw text of a parameter; binary values that are not UTF-8 are refused.
fn param_text<'a>(what: &str, value: &'a Value) -> Result<Cow<'a, str>, QueryError> {
    value.to_param_string().map_err(|e| {
        template_error(format!(
            "{what} cannot be sent as statement text: expected {}, got {}",
            e.expected, e.actual
        ))
    })
}

/// Build the final statement text from a template and its parameters.
///
/// `escape` is the dialect escaper of the connection the statement will
/// run on. Without parameters the template is returned untouched.
pub fn render<F>(template: &str, params: &[Value], escape: F) -> Result<String, QueryError>
where
    F: Fn(&str) -> String,
{
    if params.is_empty() {
        return Ok(template.to_string());
    }
    let args = params
        .iter()
        .enumerate()
        .map(|(i, p)| {
            param_text(&format!("parameter {}", i + 1), p)
                .map(|raw| escape_wildcards(&escape(&raw)))
        })
        .collect::<Result<Vec<_>, _>>()?;
    format_template(template, &args)
}

/// Backtick-quote an identifier, doubling embedded backticks.
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn literal<F: Fn(&str) -> String>(
    column: &str,
    value: &Value,
    escape: &F,
) -> Result<String, QueryError> {
    if value.is_null() {
        return Ok("NULL".to_string());
    }
    let raw = param_text(&format!("value for column {}", quote_identifier(column)), value)?;
    Ok(format!("\"{}\"", escape(&raw)))
}

/// ``INSERT INTO `table` (`a`, `b`) VALUES ("x", "y")``.
pub fn build_insert<F>(table: &str, fields: &[(&str, Value)], escape: F) -> Result<String, QueryError>
where
    F: Fn(&str) -> String,
{
    let columns: Vec<String> = fields.iter().map(|(name, _)| quote_identifier(name)).collect();
    let values = fields
        .iter()
        .map(|(name, v)| literal(name, v, &escape))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_identifier(table),
        columns.join(", "),
        values.join(", ")
    ))
}

/// ``UPDATE `table` SET `a` = "x", `b` = "y"`` followed by `extra` when
/// it is not blank.
pub fn build_update<F>(
    table: &str,
    fields: &[(&str, Value)],
    extra: &str,
    escape: F,
) -> Result<String, QueryError>
where
    F: Fn(&str) -> String,
{
    if fields.is_empty() {
        return Err(template_error(format!(
            "no columns given to update in {}",
            quote_identifier(table)
        )));
    }
    let assignments = fields
        .iter()
        .map(|(name, v)| -> Result<String, QueryError> {
            Ok(format!("{} = {}", quote_identifier(name), literal(name, v, &escape)?))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let mut sql = format!(
        "UPDATE {} SET {}",
        quote_identifier(table),
        assignments.join(", ")
    );
    let extra = extra.trim();
    if !extra.is_empty() {
        sql.push(' ');
        sql.push_str(extra);
    }
    Ok(sql)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backslash_escape(raw: &str) -> String {
        raw.replace('\\', "\\\\").replace('\'', "\\'").replace('"', "\\\"")
    }

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| (*v).to_string()).collect()
    }

    #[test]
    fn test_classify() {
        assert_eq!(StatementKind::classify("SELECT 1"), StatementKind::Read);
        assert_eq!(StatementKind::classify("  \n\tselect * from t"), StatementKind::Read);
        assert_eq!(StatementKind::classify("SeLeCt 1"), StatementKind::Read);
        // pure prefix test
        assert_eq!(StatementKind::classify("SELECTED"), StatementKind::Read);

        assert_eq!(StatementKind::classify("INSERT INTO t VALUES (1)"), StatementKind::Write);
        assert_eq!(StatementKind::classify("SHOW TABLES"), StatementKind::Write);
        assert_eq!(StatementKind::classify("(SELECT 1)"), StatementKind::Write);
        assert_eq!(StatementKind::classify("SELEC"), StatementKind::Write);
        assert_eq!(StatementKind::classify(""), StatementKind::Write);
        assert!(!StatementKind::classify("WITH x AS (SELECT 1) SELECT * FROM x").is_read());
    }

    #[test]
    fn test_escape_wildcards() {
        assert_eq!(escape_wildcards("50%_off"), "50\\%\\_off");
        assert_eq!(escape_wildcards("plain"), "plain");
        assert_eq!(escape_wildcards("a\\b"), "a\\b");
    }

    #[test]
    fn test_dialect_escape_runs_before_wildcards() {
        let sql = render(
            "SELECT * FROM t WHERE name = '%s'",
            &[Value::from("it's 100%")],
            backslash_escape,
        )
        .unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE name = 'it\\'s 100\\%'");

        // a backslash added by wildcard escaping is not escaped again
        let sql = render("%s", &[Value::from("a_b")], backslash_escape).unwrap();
        assert_eq!(sql, "a\\_b");
    }

    #[test]
    fn test_no_params_skips_formatting() {
        let sql = render("SELECT * FROM t WHERE a LIKE 'x%'", &[], backslash_escape).unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE a LIKE 'x%'");
    }

    #[test]
    fn test_format_conversions() {
        assert_eq!(
            format_template("%s-%d-%u", &args(&["a", "42abc", "-1"])).unwrap(),
            format!("a-42-{}", u64::MAX)
        );
        assert_eq!(format_template("%d", &args(&["abc"])).unwrap(), "0");
        assert_eq!(format_template("%d", &args(&[" -7.9"])).unwrap(), "-7");
        assert_eq!(format_template("%f", &args(&["1.5"])).unwrap(), "1.500000");
        assert_eq!(format_template("%.2F", &args(&["3.14159"])).unwrap(), "3.14");
        assert_eq!(format_template("%.2f", &args(&["1e2x"])).unwrap(), "100.00");
        assert_eq!(format_template("%.3s", &args(&["abcdef"])).unwrap(), "abc");
        assert_eq!(format_template("100%% of %s", &args(&["x"])).unwrap(), "100% of x");
    }

    #[test]
    fn test_format_padding() {
        assert_eq!(format_template("[%5s]", &args(&["ab"])).unwrap(), "[   ab]");
        assert_eq!(format_template("[%-5s]", &args(&["ab"])).unwrap(), "[ab   ]");
        assert_eq!(format_template("[%05d]", &args(&["-42"])).unwrap(), "[-0042]");
        assert_eq!(format_template("[%2d]", &args(&["12345"])).unwrap(), "[12345]");
    }

    #[test]
    fn test_format_positions() {
        assert_eq!(
            format_template("%2$s %1$s %2$s", &args(&["a", "b"])).unwrap(),
            "b a b"
        );
        assert_eq!(format_template("%1$s %s", &args(&["a"])).unwrap(), "a a");
    }

    #[test]
    fn test_format_count_mismatch() {
        let err = format_template("%s and %s", &args(&["one"])).unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::Template);
        assert!(err.message.contains("too few"));

        let err = format_template("%s", &args(&["one", "two"])).unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::Template);
        assert!(err.message.contains("too many"));

        let err = format_template("no placeholders", &args(&["x"])).unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::Template);
    }

    #[test]
    fn test_format_bad_specifiers() {
        for template in ["%q", "trailing %", "%0$s"] {
            let err = format_template(template, &args(&["x"])).unwrap_err();
            assert_eq!(err.kind, QueryErrorKind::Template, "{template}");
        }
    }

    #[test]
    fn test_format_integer_bases() {
        assert_eq!(format_template("%b", &args(&["5"])).unwrap(), "101");
        assert_eq!(format_template("%o", &args(&["8"])).unwrap(), "10");
        assert_eq!(format_template("%x/%X", &args(&["255", "255"])).unwrap(), "ff/FF");
        assert_eq!(format_template("%x", &args(&["-1"])).unwrap(), "ffffffffffffffff");
        assert_eq!(format_template("%c%c", &args(&["65", "98"])).unwrap(), "Ab");

        let err = format_template("%c", &args(&["300"])).unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::Template);
    }

    #[test]
    fn test_format_scientific_and_general() {
        assert_eq!(format_template("%e", &args(&["1500"])).unwrap(), "1.500000e+3");
        assert_eq!(format_template("%.2E", &args(&["0.00123"])).unwrap(), "1.23E-3");
        assert_eq!(format_template("%g", &args(&["123.456"])).unwrap(), "123.456");
        assert_eq!(format_template("%g", &args(&["0.0001234"])).unwrap(), "0.0001234");
        assert_eq!(format_template("%g", &args(&["1e6"])).unwrap(), "1.0e+6");
        assert_eq!(format_template("%G", &args(&["0.00001"])).unwrap(), "1.0E-5");
        assert_eq!(format_template("%g", &args(&["0"])).unwrap(), "0");
    }

    #[test]
    fn test_format_flags() {
        assert_eq!(format_template("%+d %+d", &args(&["5", "-5"])).unwrap(), "+5 -5");
        assert_eq!(format_template("[%+05d]", &args(&["7"])).unwrap(), "[+0007]");
        assert_eq!(format_template("[%+.1f]", &args(&["2.24x"])).unwrap(), "[+2.2]");
        assert_eq!(format_template("[%'*8s]", &args(&["ab"])).unwrap(), "[******ab]");
        assert_eq!(format_template("[%-'x5d]", &args(&["12"])).unwrap(), "[12xxx]");
        assert_eq!(format_template("[% 5d]", &args(&["3"])).unwrap(), "[    3]");
    }

    #[test]
    fn test_width_and_precision_limits() {
        for template in ["%1048577s", "%999999999999s", "%99999999999999999999999s"] {
            let err = format_template(template, &args(&["x"])).unwrap_err();
            assert_eq!(err.kind, QueryErrorKind::Template, "{template}");
        }
        let wide = format_template("%1048576s", &args(&["x"])).unwrap();
        assert_eq!(wide.len(), MAX_WIDTH);

        let precise = format_template("%.999f", &args(&["1"])).unwrap();
        assert_eq!(precise.len(), "1.".len() + 53);
    }

    #[test]
    fn test_binary_values_must_be_text() {
        let blob = Value::Bytes(vec![0xff, 0xfe, b'a']);

        let err = render("SELECT '%s'", &[blob.clone()], backslash_escape).unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::Template);
        assert!(err.message.contains("parameter 1"), "{}", err.message);

        let err = build_insert("t", &[("data", blob.clone())], backslash_escape).unwrap_err();
        assert!(err.message.contains("`data`"), "{}", err.message);
        let err = build_update("t", &[("data", blob)], "", backslash_escape).unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::Template);

        let utf8 = Value::Bytes("ok".as_bytes().to_vec());
        assert_eq!(render("'%s'", &[utf8], backslash_escape).unwrap(), "'ok'");
    }

    #[test]
    fn test_build_update() {
        let sql = build_update("t", &[("a", Value::from("y"))], "WHERE id=1", backslash_escape)
            .unwrap();
        assert_eq!(sql, "UPDATE `t` SET `a` = \"y\" WHERE id=1");

        let sql = build_update(
            "t",
            &[("a", Value::from("say \"hi\"")), ("b", Value::Null)],
            "  ",
            backslash_escape,
        )
        .unwrap();
        assert_eq!(sql, "UPDATE `t` SET `a` = \"say \\\"hi\\\"\", `b` = NULL");

        let err = build_update("t", &[], "", backslash_escape).unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::Template);
    }

    #[test]
    fn test_build_insert() {
        let sql = build_insert(
            "odd`name",
            &[("id", Value::from(7)), ("note", Value::from("x\"y"))],
            backslash_escape,
        )
        .unwrap();
        assert_eq!(
            sql,
            "INSERT INTO `odd``name` (`id`, `note`) VALUES (\"7\", \"x\\\"y\")"
        );
    }
}
