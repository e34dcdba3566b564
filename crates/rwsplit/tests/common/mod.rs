//! In-memory SQL servers for driver tests.
//!
//! Every host keeps its own tables, so a replica only sees rows after
//! [`FakeDb::replicate`] copies them over. Each statement sent is logged
//! with the host and connection that received it.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use rwsplit::{
    ConnectionError, ConnectionErrorKind, Connector, DbConfig, Driver, Error, QueryError,
    QueryErrorKind, ReplicaSelector, Result, Row, ServerDescriptor, SqlClient, Value,
};
use rwsplit_core::{ColumnInfo, QueryResult};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    next_id: u64,
}

type Tables = HashMap<String, Table>;

/// One statement as received by a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub host: String,
    pub conn: u32,
    pub sql: String,
}

#[derive(Debug, Default)]
pub struct World {
    tables: HashMap<String, Tables>,
    pub log: Vec<Sent>,
    pub opened: Vec<(String, u32)>,
    pub closed: Vec<u32>,
    pub charsets: Vec<(String, String)>,
    next_conn: u32,
    down: HashSet<String>,
    bad_charsets: HashSet<String>,
    failures: Vec<(String, u16, String)>,
    versions: HashMap<String, u32>,
}

/// Handle on a shared set of fake servers.
#[derive(Debug, Clone, Default)]
pub struct FakeDb(Arc<Mutex<World>>);

impl FakeDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn world(&self) -> MutexGuard<'_, World> {
        self.0.lock().unwrap()
    }

    pub fn connector(&self) -> FakeConnector {
        FakeConnector { db: self.clone() }
    }

    pub fn create_table(&self, hosts: &[&str], name: &str, columns: &[&str]) {
        let mut world = self.world();
        for host in hosts {
            world.tables.entry((*host).to_string()).or_default().insert(
                name.to_string(),
                Table {
                    columns: columns.iter().map(|c| (*c).to_string()).collect(),
                    ..Table::default()
                },
            );
        }
    }

    /// Copy every table of `from` onto each host in `to`.
    pub fn replicate(&self, from: &str, to: &[&str]) {
        let mut world = self.world();
        let source = world.tables.get(from).cloned().unwrap_or_default();
        for host in to {
            world.tables.insert((*host).to_string(), source.clone());
        }
    }

    pub fn table(&self, host: &str, name: &str) -> Option<Table> {
        self.world().tables.get(host)?.get(name).cloned()
    }

    pub fn row_count(&self, host: &str, name: &str) -> usize {
        self.table(host, name).map_or(0, |t| t.rows.len())
    }

    pub fn take_down(&self, host: &str) {
        self.world().down.insert(host.to_string());
    }

    pub fn reject_charset(&self, charset: &str) {
        self.world().bad_charsets.insert(charset.to_string());
    }

    /// Fail every statement containing `needle` with a server error.
    pub fn fail_when(&self, needle: &str, code: u16, message: &str) {
        self.world()
            .failures
            .push((needle.to_string(), code, message.to_string()));
    }

    pub fn set_version(&self, host: &str, version: u32) {
        self.world().versions.insert(host.to_string(), version);
    }

    pub fn statements(&self) -> Vec<Sent> {
        self.world().log.clone()
    }

    pub fn last_statement(&self) -> Option<Sent> {
        self.world().log.last().cloned()
    }

    /// Hosts that received statements starting with `prefix`, in order.
    pub fn hosts_for(&self, prefix: &str) -> Vec<String> {
        self.world()
            .log
            .iter()
            .filter(|s| {
                s.sql
                    .get(..prefix.len())
                    .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
            })
            .map(|s| s.host.clone())
            .collect()
    }

    pub fn opened_hosts(&self) -> Vec<String> {
        self.world().opened.iter().map(|(h, _)| h.clone()).collect()
    }

    pub fn open_connections(&self) -> usize {
        let world = self.world();
        world.opened.len() - world.closed.len()
    }
}

#[derive(Debug, Clone)]
pub struct FakeConnector {
    db: FakeDb,
}

impl Connector for FakeConnector {
    type Client = FakeClient;

    fn connect(&self, server: &ServerDescriptor) -> std::result::Result<FakeClient, ConnectionError> {
        let mut world = self.db.world();
        if world.down.contains(&server.hostname) {
            return Err(ConnectionError::new(
                ConnectionErrorKind::Refused,
                format!("Can't connect to MySQL server on '{}'", server.hostname),
            )
            .with_code(2003));
        }
        world.next_conn += 1;
        let id = world.next_conn;
        world.opened.push((server.hostname.clone(), id));
        world.tables.entry(server.hostname.clone()).or_default();
        Ok(FakeClient {
            db: self.db.clone(),
            host: server.hostname.clone(),
            id,
            open: true,
            autocommit: true,
            snapshot: None,
            affected_rows: 0,
            last_insert_id: 0,
        })
    }
}

#[derive(Debug)]
pub struct FakeClient {
    db: FakeDb,
    host: String,
    id: u32,
    open: bool,
    autocommit: bool,
    snapshot: Option<Tables>,
    affected_rows: u64,
    last_insert_id: u64,
}

impl FakeClient {
    fn log(&self, world: &mut World, sql: &str) {
        world.log.push(Sent {
            host: self.host.clone(),
            conn: self.id,
            sql: sql.to_string(),
        });
    }
}

fn server_error(code: u16, message: String, sql: &str) -> Error {
    let kind = if code == 1064 {
        QueryErrorKind::Syntax
    } else if code == 1146 || code == 1054 {
        QueryErrorKind::NotFound
    } else {
        QueryErrorKind::Database
    };
    let mut err = QueryError::new(kind, message);
    err.code = Some(code);
    err.sql = Some(sql.to_string());
    Error::Query(err)
}

impl SqlClient for FakeClient {
    fn query(&mut self, sql: &str) -> Result<QueryResult> {
        let mut world = self.db.world();
        self.log(&mut world, sql);
        if let Some((_, code, message)) = world
            .failures
            .iter()
            .find(|(needle, _, _)| sql.contains(needle.as_str()))
        {
            return Err(server_error(*code, message.clone(), sql));
        }
        let tables = world.tables.entry(self.host.clone()).or_default();
        let result = run(tables, sql).map_err(|(code, message)| server_error(code, message, sql))?;
        self.affected_rows = result.affected_rows;
        self.last_insert_id = result.last_insert_id;
        Ok(result)
    }

    fn escape_string(&self, raw: &str) -> String {
        let mut out = String::with_capacity(raw.len());
        for c in raw.chars() {
            match c {
                '\0' => out.push_str("\\0"),
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\x1a' => out.push_str("\\Z"),
                '\\' | '\'' | '"' => {
                    out.push('\\');
                    out.push(c);
                }
                _ => out.push(c),
            }
        }
        out
    }

    fn set_charset(&mut self, charset: &str) -> Result<()> {
        let mut world = self.db.world();
        if world.bad_charsets.contains(charset) {
            let mut err = QueryError::new(
                QueryErrorKind::Database,
                format!("Unknown character set: '{charset}'"),
            );
            err.code = Some(1115);
            return Err(Error::Query(err));
        }
        world.charsets.push((self.host.clone(), charset.to_string()));
        Ok(())
    }

    fn set_autocommit(&mut self, enabled: bool) -> Result<()> {
        let mut world = self.db.world();
        self.log(&mut world, if enabled { "SET autocommit=1" } else { "SET autocommit=0" });
        if enabled {
            self.snapshot = None;
        } else if self.autocommit {
            self.snapshot = world.tables.get(&self.host).cloned();
        }
        self.autocommit = enabled;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        let mut world = self.db.world();
        self.log(&mut world, "COMMIT");
        if !self.autocommit {
            self.snapshot = world.tables.get(&self.host).cloned();
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        let mut world = self.db.world();
        self.log(&mut world, "ROLLBACK");
        if let Some(snapshot) = &self.snapshot {
            world.tables.insert(self.host.clone(), snapshot.clone());
        }
        Ok(())
    }

    fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    fn last_insert_id(&self) -> u64 {
        self.last_insert_id
    }

    fn stat(&mut self) -> Result<String> {
        let world = self.db.world();
        let threads = world.opened.len() - world.closed.len();
        Ok(format!("Uptime: 42  Threads: {threads}  Host: {}", self.host))
    }

    fn server_version(&self) -> u32 {
        self.db
            .world()
            .versions
            .get(&self.host)
            .copied()
            .unwrap_or(80036)
    }

    fn close(&mut self) -> Result<()> {
        if self.open {
            self.open = false;
            self.db.world().closed.push(self.id);
        }
        Ok(())
    }
}

// ==================== Statement interpreter ====================

type Failure = (u16, String);

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Word(String),
    Lit(Value),
    Sym(char),
}

fn syntax_error(near: &str) -> Failure {
    (
        1064,
        format!("You have an error in your SQL syntax near '{near}'"),
    )
}

fn tokenize(sql: &str) -> std::result::Result<Vec<Tok>, Failure> {
    let chars: Vec<char> = sql.chars().collect();
    let mut toks = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '`' {
            let end = chars[i + 1..]
                .iter()
                .position(|&ch| ch == '`')
                .ok_or_else(|| syntax_error(sql))?;
            toks.push(Tok::Word(chars[i + 1..i + 1 + end].iter().collect()));
            i += end + 2;
        } else if c == '\'' || c == '"' {
            let mut text = String::new();
            i += 1;
            loop {
                let ch = *chars.get(i).ok_or_else(|| syntax_error(sql))?;
                i += 1;
                if ch == '\\' {
                    let escaped = *chars.get(i).ok_or_else(|| syntax_error(sql))?;
                    i += 1;
                    match escaped {
                        '0' => text.push('\0'),
                        'n' => text.push('\n'),
                        'r' => text.push('\r'),
                        'Z' => text.push('\x1a'),
                        // the server keeps these two escapes verbatim
                        '%' | '_' => {
                            text.push('\\');
                            text.push(escaped);
                        }
                        other => text.push(other),
                    }
                } else if ch == c {
                    if chars.get(i) == Some(&c) {
                        text.push(c);
                        i += 1;
                    } else {
                        break;
                    }
                } else {
                    text.push(ch);
                }
            }
            toks.push(Tok::Lit(Value::Text(text)));
        } else if c.is_ascii_digit()
            || (c == '-' && chars.get(i + 1).is_some_and(char::is_ascii_digit))
        {
            let start = i;
            i += 1;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let value = match text.parse::<i64>() {
                Ok(n) => Value::BigInt(n),
                Err(_) => Value::Double(text.parse().map_err(|_| syntax_error(&text))?),
            };
            toks.push(Tok::Lit(value));
        } else if c.is_alphanumeric() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            if word.eq_ignore_ascii_case("NULL") {
                toks.push(Tok::Lit(Value::Null));
            } else {
                toks.push(Tok::Word(word));
            }
        } else {
            toks.push(Tok::Sym(c));
            i += 1;
        }
    }
    Ok(toks)
}

struct Parser {
    toks: Vec<Tok>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn near(&self) -> String {
        format!("{:?}", self.peek())
    }

    fn keyword(&mut self, kw: &str) -> bool {
        match self.peek() {
            Some(Tok::Word(w)) if w.eq_ignore_ascii_case(kw) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> std::result::Result<(), Failure> {
        if self.keyword(kw) {
            Ok(())
        } else {
            Err(syntax_error(&self.near()))
        }
    }

    fn sym(&mut self, c: char) -> bool {
        if self.peek() == Some(&Tok::Sym(c)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_sym(&mut self, c: char) -> std::result::Result<(), Failure> {
        if self.sym(c) {
            Ok(())
        } else {
            Err(syntax_error(&self.near()))
        }
    }

    fn word(&mut self) -> std::result::Result<String, Failure> {
        match self.peek() {
            Some(Tok::Word(w)) => {
                let w = w.clone();
                self.pos += 1;
                Ok(w)
            }
            _ => Err(syntax_error(&self.near())),
        }
    }

    fn literal(&mut self) -> std::result::Result<Value, Failure> {
        match self.peek() {
            Some(Tok::Lit(v)) => {
                let v = v.clone();
                self.pos += 1;
                Ok(v)
            }
            _ => Err(syntax_error(&self.near())),
        }
    }

    fn list<T>(
        &mut self,
        mut item: impl FnMut(&mut Self) -> std::result::Result<T, Failure>,
    ) -> std::result::Result<Vec<T>, Failure> {
        let mut items = vec![item(self)?];
        while self.sym(',') {
            items.push(item(self)?);
        }
        Ok(items)
    }

    fn condition(&mut self) -> std::result::Result<Vec<(String, Value)>, Failure> {
        if !self.keyword("WHERE") {
            return Ok(Vec::new());
        }
        let mut terms = Vec::new();
        loop {
            let column = self.word()?;
            self.expect_sym('=')?;
            terms.push((column, self.literal()?));
            if !self.keyword("AND") {
                return Ok(terms);
            }
        }
    }

    fn finish(&mut self) -> std::result::Result<(), Failure> {
        self.sym(';');
        match self.peek() {
            None => Ok(()),
            Some(_) => Err(syntax_error(&self.near())),
        }
    }
}

fn same(a: &Value, b: &Value) -> bool {
    if a.is_null() || b.is_null() {
        return false;
    }
    match (a.to_param_string(), b.to_param_string()) {
        (Ok(x), Ok(y)) => x == y,
        _ => false,
    }
}

fn table_mut<'a>(tables: &'a mut Tables, name: &str) -> std::result::Result<&'a mut Table, Failure> {
    tables
        .get_mut(name)
        .ok_or_else(|| (1146, format!("Table 'test.{name}' doesn't exist")))
}

fn column_index(table: &Table, column: &str) -> std::result::Result<usize, Failure> {
    table
        .columns
        .iter()
        .position(|c| c == column)
        .ok_or_else(|| (1054, format!("Unknown column '{column}' in 'field list'")))
}

fn matching(table: &Table, terms: &[(String, Value)]) -> std::result::Result<Vec<usize>, Failure> {
    let terms = terms
        .iter()
        .map(|(c, v)| Ok((column_index(table, c)?, v)))
        .collect::<std::result::Result<Vec<_>, Failure>>()?;
    Ok((0..table.rows.len())
        .filter(|&r| terms.iter().all(|(c, v)| same(&table.rows[r][*c], v)))
        .collect())
}

fn rows_result(names: Vec<String>, rows: Vec<Vec<Value>>) -> QueryResult {
    let columns = Arc::new(ColumnInfo::new(names));
    let rows = rows
        .into_iter()
        .map(|values| Row::with_columns(Arc::clone(&columns), values))
        .collect();
    QueryResult::with_rows(columns, rows)
}

fn run(tables: &mut Tables, sql: &str) -> std::result::Result<QueryResult, Failure> {
    let mut p = Parser {
        toks: tokenize(sql)?,
        pos: 0,
    };
    if p.keyword("INSERT") {
        p.expect_keyword("INTO")?;
        let name = p.word()?;
        p.expect_sym('(')?;
        let columns = if p.sym(')') {
            Vec::new()
        } else {
            let columns = p.list(Parser::word)?;
            p.expect_sym(')')?;
            columns
        };
        p.expect_keyword("VALUES")?;
        p.expect_sym('(')?;
        let values = if p.sym(')') {
            Vec::new()
        } else {
            let values = p.list(Parser::literal)?;
            p.expect_sym(')')?;
            values
        };
        p.finish()?;
        if columns.len() != values.len() {
            return Err((1136, "Column count doesn't match value count at row 1".to_string()));
        }
        insert(table_mut(tables, &name)?, &columns, values)
    } else if p.keyword("UPDATE") {
        let name = p.word()?;
        p.expect_keyword("SET")?;
        let assignments = p.list(|p| {
            let column = p.word()?;
            p.expect_sym('=')?;
            Ok((column, p.literal()?))
        })?;
        let terms = p.condition()?;
        p.finish()?;
        let table = table_mut(tables, &name)?;
        let targets = assignments
            .into_iter()
            .map(|(c, v)| Ok((column_index(table, &c)?, v)))
            .collect::<std::result::Result<Vec<_>, Failure>>()?;
        let hits = matching(table, &terms)?;
        for &r in &hits {
            for (c, v) in &targets {
                table.rows[r][*c] = v.clone();
            }
        }
        Ok(QueryResult::command(hits.len() as u64, 0))
    } else if p.keyword("DELETE") {
        p.expect_keyword("FROM")?;
        let name = p.word()?;
        let terms = p.condition()?;
        p.finish()?;
        let table = table_mut(tables, &name)?;
        let hits = matching(table, &terms)?;
        for &r in hits.iter().rev() {
            table.rows.remove(r);
        }
        Ok(QueryResult::command(hits.len() as u64, 0))
    } else if p.keyword("SELECT") {
        select(tables, &mut p)
    } else {
        // SET, DO and friends succeed without effect
        Ok(QueryResult::command(0, 0))
    }
}

fn insert(
    table: &mut Table,
    columns: &[String],
    values: Vec<Value>,
) -> std::result::Result<QueryResult, Failure> {
    let mut row = vec![Value::Null; table.columns.len()];
    for (column, value) in columns.iter().zip(values) {
        row[column_index(table, column)?] = value;
    }
    let mut insert_id = 0;
    if let Ok(id_col) = column_index(table, "id") {
        if row[id_col].is_null() {
            table.next_id += 1;
            row[id_col] = Value::BigInt(table.next_id as i64);
            insert_id = table.next_id;
        } else if let Some(id) = row[id_col].as_i64() {
            table.next_id = table.next_id.max(id as u64);
            insert_id = id as u64;
        }
    }
    table.rows.push(row);
    Ok(QueryResult::command(1, insert_id))
}

fn select(tables: &Tables, p: &mut Parser) -> std::result::Result<QueryResult, Failure> {
    if matches!(p.peek(), Some(Tok::Lit(_))) {
        let values = p.list(Parser::literal)?;
        p.finish()?;
        let names = values.iter().map(|v| v.to_param_string().unwrap().into_owned()).collect();
        return Ok(rows_result(names, vec![values]));
    }

    let count = p.keyword("COUNT");
    let columns = if count {
        p.expect_sym('(')?;
        p.expect_sym('*')?;
        p.expect_sym(')')?;
        Vec::new()
    } else if p.sym('*') {
        Vec::new()
    } else {
        p.list(Parser::word)?
    };
    p.expect_keyword("FROM")?;
    let name = p.word()?;
    let terms = p.condition()?;
    p.finish()?;

    let table = tables
        .get(&name)
        .ok_or_else(|| (1146, format!("Table 'test.{name}' doesn't exist")))?;
    let hits = matching(table, &terms)?;
    if count {
        return Ok(rows_result(
            vec!["COUNT(*)".to_string()],
            vec![vec![Value::BigInt(hits.len() as i64)]],
        ));
    }
    let picked: Vec<usize> = if columns.is_empty() {
        (0..table.columns.len()).collect()
    } else {
        columns
            .iter()
            .map(|c| column_index(table, c))
            .collect::<std::result::Result<_, _>>()?
    };
    let names = picked.iter().map(|&c| table.columns[c].clone()).collect();
    let rows = hits
        .iter()
        .map(|&r| picked.iter().map(|&c| table.rows[r][c].clone()).collect())
        .collect();
    Ok(rows_result(names, rows))
}

// ==================== Driver helpers ====================

pub fn config(hosts: &[&str]) -> DbConfig {
    DbConfig::with_servers(
        hosts
            .iter()
            .map(|h| ServerDescriptor::new(*h).username("app").password("secret"))
            .collect(),
    )
}

/// A driver over `hosts` whose replica choices come from `selector`.
pub fn driver(
    db: &FakeDb,
    hosts: &[&str],
    selector: impl ReplicaSelector + 'static,
) -> Driver<FakeConnector> {
    Driver::with_selector("test", &config(hosts), db.connector(), Box::new(selector)).unwrap()
}

/// Replica offsets taken from `picks` in turn, then 0 forever.
pub fn scripted(picks: &[usize]) -> impl ReplicaSelector + 'static {
    let mut picks = picks.to_vec().into_iter();
    move |_: usize| picks.next().unwrap_or(0)
}

pub fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}
