//! Blocking MySQL connection over the text protocol.
//!
//! Establishing a session runs the v10 handshake and whichever
//! authentication exchange the server asks for (native password,
//! `caching_sha2_password` fast and full paths, auth switch). Statements go
//! out as `COM_QUERY`; result sets are read fully before returning.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;

use rwsplit_core::error::{
    ConnectionError, ConnectionErrorKind, Error, ProtocolError, QueryError, QueryErrorKind,
};
use rwsplit_core::{ColumnInfo, QueryResult, Row, SqlClient, Value};
use tracing::{debug, trace, warn};

use crate::auth;
use crate::config::MySqlConfig;
use crate::protocol::{
    Command, ErrPacket, MAX_PACKET_SIZE, PacketHeader, PacketReader, PacketType, PacketWriter,
    capabilities, charset, frame_packets, server_status,
};
use crate::types::{ColumnDef, FieldType, escape_string};

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Ready for statements, autocommit or idle
    Ready,
    /// The server reports an open transaction
    InTransaction,
    /// `COM_QUIT` sent or the socket failed
    Closed,
}

/// What the server announced in its initial handshake.
#[derive(Debug, Clone)]
pub struct ServerHandshake {
    pub capabilities: u32,
    pub server_version: String,
    pub connection_id: u32,
    pub auth_plugin: String,
    pub auth_data: Vec<u8>,
    pub charset: u8,
    pub status_flags: u16,
}

/// One MySQL session.
///
/// Generic over the byte stream so the protocol can run over anything that
/// reads and writes; production connections use `TcpStream`.
pub struct MySqlConnection<S: Read + Write = TcpStream> {
    stream: S,
    state: ConnectionState,
    handshake: ServerHandshake,
    /// Capabilities both sides agreed on
    capabilities: u32,
    status_flags: u16,
    affected_rows: u64,
    last_insert_id: u64,
    warnings: u16,
    config: MySqlConfig,
    sequence_id: u8,
}

impl<S: Read + Write> std::fmt::Debug for MySqlConnection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlConnection")
            .field("state", &self.state)
            .field("connection_id", &self.handshake.connection_id)
            .field("server_version", &self.handshake.server_version)
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .finish_non_exhaustive()
    }
}

impl MySqlConnection<TcpStream> {
    /// Open a TCP connection and authenticate.
    ///
    /// Every address the host resolves to is tried in turn with the
    /// configured connect timeout.
    #[tracing::instrument(level = "debug", skip(config), fields(host = %config.host, port = config.port))]
    pub fn connect(config: MySqlConfig) -> Result<Self, Error> {
        let addrs = config.socket_addr().to_socket_addrs().map_err(|e| {
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                code: None,
                message: format!("Cannot resolve {}: {}", config.socket_addr(), e),
                source: Some(Box::new(e)),
            })
        })?;

        let mut last_err = None;
        let mut stream = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, config.connect_timeout) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => last_err = Some(e),
            }
        }

        let stream = match (stream, last_err) {
            (Some(s), _) => s,
            (None, Some(e)) => {
                let kind = if e.kind() == std::io::ErrorKind::ConnectionRefused {
                    ConnectionErrorKind::Refused
                } else {
                    ConnectionErrorKind::Connect
                };
                return Err(Error::Connection(ConnectionError {
                    kind,
                    code: None,
                    message: format!("Failed to connect to {}: {}", config.socket_addr(), e),
                    source: Some(Box::new(e)),
                }));
            }
            (None, None) => {
                return Err(connection_error(format!(
                    "{} resolved to no addresses",
                    config.socket_addr()
                )));
            }
        };

        // Socket options are best effort; the session works without them.
        stream.set_nodelay(true).ok();
        stream.set_read_timeout(Some(config.connect_timeout)).ok();
        stream.set_write_timeout(Some(config.connect_timeout)).ok();

        Self::from_stream(stream, config)
    }
}

impl<S: Read + Write> MySqlConnection<S> {
    /// Run the handshake and authentication over an already open stream.
    pub fn from_stream(mut stream: S, config: MySqlConfig) -> Result<Self, Error> {
        let (payload, seq) = read_packet(&mut stream)?;
        if payload.first() == Some(&0xFF) {
            // Server refused before the handshake (too many connections, host blocked)
            let err = PacketReader::new(&payload)
                .parse_err_packet()
                .ok_or_else(|| protocol_error("Invalid error packet"))?;
            return Err(connect_error(&err));
        }
        let handshake = parse_handshake(&payload)?;
        let capabilities = config.capability_flags() & handshake.capabilities;

        let mut conn = Self {
            stream,
            state: ConnectionState::Ready,
            status_flags: handshake.status_flags,
            handshake,
            capabilities,
            affected_rows: 0,
            last_insert_id: 0,
            warnings: 0,
            config,
            sequence_id: seq.wrapping_add(1),
        };

        debug!(
            connection_id = conn.handshake.connection_id,
            server_version = %conn.handshake.server_version,
            plugin = %conn.handshake.auth_plugin,
            "MySQL handshake received"
        );

        conn.send_handshake_response()?;
        conn.authenticate()?;
        Ok(conn)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state != ConnectionState::Closed
    }

    pub fn connection_id(&self) -> u32 {
        self.handshake.connection_id
    }

    /// Version string from the handshake, e.g. `8.0.36-0ubuntu0.22.04.1`.
    pub fn server_version_string(&self) -> &str {
        &self.handshake.server_version
    }

    /// Server version as `major * 10000 + minor * 100 + patch`.
    pub fn server_version_number(&self) -> u32 {
        version_number(&self.handshake.server_version)
    }

    pub fn warnings(&self) -> u16 {
        self.warnings
    }

    /// Whether the session runs with `NO_BACKSLASH_ESCAPES`.
    pub fn no_backslash_escapes(&self) -> bool {
        self.status_flags & server_status::SERVER_STATUS_NO_BACKSLASH_ESCAPES != 0
    }

    fn send_handshake_response(&mut self) -> Result<(), Error> {
        let plugin = self.handshake.auth_plugin.clone();
        let auth_response = self.initial_auth_response(&plugin);
        let caps = self.capabilities;

        let mut writer = PacketWriter::new();
        writer.write_u32_le(caps);
        writer.write_u32_le(self.config.max_packet_size);
        writer.write_u8(self.config.charset);
        writer.write_zeros(23);
        writer.write_null_string(&self.config.user);

        if caps & capabilities::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
            writer.write_lenenc_bytes(&auth_response);
        } else {
            let len = u8::try_from(auth_response.len())
                .map_err(|_| protocol_error("Authentication response too long"))?;
            writer.write_u8(len);
            writer.write_bytes(&auth_response);
        }

        if caps & capabilities::CLIENT_CONNECT_WITH_DB != 0 {
            writer.write_null_string(self.config.database.as_deref().unwrap_or_default());
        }
        if caps & capabilities::CLIENT_PLUGIN_AUTH != 0 {
            writer.write_null_string(&plugin);
        }
        if caps & capabilities::CLIENT_CONNECT_ATTRS != 0 {
            let mut attrs = PacketWriter::new();
            for (key, value) in &self.config.attributes {
                attrs.write_lenenc_string(key);
                attrs.write_lenenc_string(value);
            }
            writer.write_lenenc_bytes(&attrs.into_payload());
        }

        self.write_packet(&writer.into_payload())
    }

    fn password(&self) -> &str {
        self.config.password.as_deref().unwrap_or_default()
    }

    fn initial_auth_response(&self, plugin: &str) -> Vec<u8> {
        let password = self.password();
        match auth::scramble_for(plugin, password, &self.handshake.auth_data) {
            Some(scramble) => scramble,
            // sha256_password: ask for the public key right away
            None if plugin == auth::plugins::SHA256_PASSWORD && !password.is_empty() => {
                vec![1]
            }
            None => Vec::new(),
        }
    }

    /// Drive the authentication exchange until the server sends OK or ERR.
    fn authenticate(&mut self) -> Result<(), Error> {
        let mut auth_data = self.handshake.auth_data.clone();
        loop {
            let payload = self.read_packet()?;
            match payload.first().copied() {
                Some(0x00) => {
                    if let Some(ok) = PacketReader::new(&payload).parse_ok_packet() {
                        self.status_flags = ok.status_flags;
                    }
                    debug!(
                        connection_id = self.handshake.connection_id,
                        "MySQL authentication succeeded"
                    );
                    return Ok(());
                }
                Some(0xFF) => {
                    let err = PacketReader::new(&payload)
                        .parse_err_packet()
                        .ok_or_else(|| protocol_error("Invalid error packet"))?;
                    return Err(connect_error(&err));
                }
                Some(0xFE) => {
                    // Auth switch: plugin name, then fresh scramble
                    let mut reader = PacketReader::new(&payload[1..]);
                    let plugin = reader
                        .read_null_string()
                        .ok_or_else(|| protocol_error("Missing plugin name in auth switch"))?;
                    auth_data = reader.read_rest().to_vec();
                    trace!(plugin = %plugin, "MySQL auth switch");
                    let response = auth::scramble_for(&plugin, self.password(), &auth_data)
                        .ok_or_else(|| {
                            auth_error(format!("Unsupported authentication plugin: {plugin}"))
                        })?;
                    self.write_packet(&response)?;
                }
                Some(0x01) => self.handle_more_data(&payload[1..], &auth_data)?,
                Some(other) => {
                    return Err(protocol_error(format!(
                        "Unknown auth response: {other:02X}"
                    )));
                }
                None => return Err(protocol_error("Empty authentication response")),
            }
        }
    }

    /// AuthMoreData from `caching_sha2_password` or `sha256_password`.
    fn handle_more_data(&mut self, data: &[u8], auth_data: &[u8]) -> Result<(), Error> {
        if data.starts_with(b"-----BEGIN") {
            return self.send_rsa_password(data, auth_data);
        }
        match data.first().copied() {
            Some(auth::caching_sha2::FAST_AUTH_SUCCESS) => Ok(()),
            Some(auth::caching_sha2::PERFORM_FULL_AUTH) => {
                trace!("MySQL full authentication, requesting server public key");
                self.write_packet(&[auth::caching_sha2::REQUEST_PUBLIC_KEY])?;
                let key = self.read_packet()?;
                match key.split_first() {
                    Some((0x01, pem)) => self.send_rsa_password(pem, auth_data),
                    Some((0xFF, _)) => {
                        let err = PacketReader::new(&key)
                            .parse_err_packet()
                            .ok_or_else(|| protocol_error("Invalid error packet"))?;
                        Err(connect_error(&err))
                    }
                    _ => Err(protocol_error("Expected server public key")),
                }
            }
            _ => Err(protocol_error("Unexpected authentication data")),
        }
    }

    fn send_rsa_password(&mut self, pem: &[u8], auth_data: &[u8]) -> Result<(), Error> {
        let encrypted =
            auth::sha256_password_rsa(self.password(), auth_data, pem).map_err(auth_error)?;
        self.write_packet(&encrypted)
    }

    /// Send a command with a fresh sequence.
    fn send_command(&mut self, command: Command, arg: &[u8]) -> Result<(), Error> {
        if self.state == ConnectionState::Closed {
            return Err(Error::Connection(ConnectionError::new(
                ConnectionErrorKind::Disconnected,
                "Connection is closed",
            )));
        }
        self.sequence_id = 0;
        let payload = PacketWriter::command(command as u8, arg).into_payload();
        self.write_packet(&payload)
    }

    /// Run one statement and collect its complete result.
    #[tracing::instrument(level = "trace", skip(self), fields(connection_id = self.handshake.connection_id))]
    pub fn query(&mut self, sql: &str) -> Result<QueryResult, Error> {
        self.send_command(Command::Query, sql.as_bytes())?;
        let first = self.read_result()?;
        self.drain_more_results()?;
        self.refresh_state();
        first.map_err(|e| e.with_sql(sql))
    }

    /// Read one result. The outer error is a transport failure, the inner
    /// one a server-reported statement failure.
    fn read_result(&mut self) -> Result<Result<QueryResult, Error>, Error> {
        let payload = self.read_packet()?;
        let Some(&first) = payload.first() else {
            return Err(protocol_error("Empty query response"));
        };

        match PacketType::from_first_byte(first, payload.len()) {
            PacketType::Ok => {
                let ok = PacketReader::new(&payload)
                    .parse_ok_packet()
                    .ok_or_else(|| protocol_error("Invalid OK packet"))?;
                self.affected_rows = ok.affected_rows;
                self.last_insert_id = ok.last_insert_id;
                self.status_flags = ok.status_flags;
                self.warnings = ok.warnings;
                Ok(Ok(QueryResult::command(ok.affected_rows, ok.last_insert_id)))
            }
            PacketType::Error => {
                let err = PacketReader::new(&payload)
                    .parse_err_packet()
                    .ok_or_else(|| protocol_error("Invalid error packet"))?;
                // ERR ends the response; no more results follow
                self.status_flags &= !server_status::SERVER_MORE_RESULTS_EXISTS;
                Ok(Err(query_error(&err)))
            }
            PacketType::LocalInfile => {
                // Refuse by sending an empty packet; the server answers with OK or ERR
                self.write_packet(&[])?;
                let reply = self.read_packet()?;
                if let Some(ok) = PacketReader::new(&reply).parse_ok_packet() {
                    self.status_flags = ok.status_flags;
                }
                Ok(Err(Error::Query(QueryError::new(
                    QueryErrorKind::Database,
                    "LOCAL INFILE is not supported",
                ))))
            }
            PacketType::Eof | PacketType::Data => self.read_result_set(&payload),
        }
    }

    fn read_result_set(&mut self, first: &[u8]) -> Result<Result<QueryResult, Error>, Error> {
        let column_count = PacketReader::new(first)
            .read_lenenc_int()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| protocol_error("Invalid column count"))?;

        let mut columns = Vec::with_capacity(column_count);
        for _ in 0..column_count {
            let payload = self.read_packet()?;
            columns.push(parse_column_def(&payload)?);
        }
        let deprecate_eof = self.capabilities & capabilities::CLIENT_DEPRECATE_EOF != 0;
        if !deprecate_eof {
            self.read_packet()?;
        }

        let names = columns.iter().map(|c| c.name.clone()).collect();
        let info = Arc::new(ColumnInfo::new(names));
        let mut rows = Vec::new();

        loop {
            let payload = self.read_packet()?;
            let Some(&first) = payload.first() else {
                return Err(protocol_error("Empty row packet"));
            };
            match PacketType::from_first_byte(first, payload.len()) {
                PacketType::Eof => {
                    let mut reader = PacketReader::new(&payload);
                    if deprecate_eof {
                        if let Some(ok) = reader.parse_ok_packet() {
                            self.status_flags = ok.status_flags;
                            self.warnings = ok.warnings;
                        }
                    } else if let Some(eof) = reader.parse_eof_packet() {
                        self.status_flags = eof.status_flags;
                        self.warnings = eof.warnings;
                    }
                    break;
                }
                PacketType::Error => {
                    let err = PacketReader::new(&payload)
                        .parse_err_packet()
                        .ok_or_else(|| protocol_error("Invalid error packet"))?;
                    self.status_flags &= !server_status::SERVER_MORE_RESULTS_EXISTS;
                    return Ok(Err(query_error(&err)));
                }
                _ => rows.push(parse_text_row(&payload, &columns, &info)?),
            }
        }

        // Row count, as mysql_affected_rows reports after a SELECT
        self.affected_rows = rows.len() as u64;
        self.last_insert_id = 0;
        let mut result = QueryResult::with_rows(info, rows);
        result.affected_rows = self.affected_rows;
        Ok(Ok(result))
    }

    /// Multi-statement responses: keep the first result, discard the rest.
    fn drain_more_results(&mut self) -> Result<(), Error> {
        while self.status_flags & server_status::SERVER_MORE_RESULTS_EXISTS != 0 {
            if let Err(e) = self.read_result()? {
                warn!(error = %e, "Discarded failure from a follow-up result");
            }
        }
        Ok(())
    }

    fn refresh_state(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.state = if self.status_flags & server_status::SERVER_STATUS_IN_TRANS != 0 {
            ConnectionState::InTransaction
        } else {
            ConnectionState::Ready
        };
    }

    /// Run a statement whose result only matters for success.
    fn execute_simple(&mut self, sql: &str) -> Result<(), Error> {
        self.query(sql).map(|_| ())
    }

    /// `COM_STATISTICS`: uptime, threads, questions and so on.
    pub fn statistics(&mut self) -> Result<String, Error> {
        self.send_command(Command::Statistics, &[])?;
        let payload = self.read_packet()?;
        if payload.first() == Some(&0xFF) {
            let err = PacketReader::new(&payload)
                .parse_err_packet()
                .ok_or_else(|| protocol_error("Invalid error packet"))?;
            return Err(query_error(&err));
        }
        Ok(String::from_utf8_lossy(&payload).into_owned())
    }

    /// `COM_PING`.
    pub fn ping(&mut self) -> Result<(), Error> {
        self.send_command(Command::Ping, &[])?;
        let payload = self.read_packet()?;
        if payload.first() == Some(&0x00) {
            Ok(())
        } else {
            Err(connection_error("Ping failed"))
        }
    }

    /// Switch the session character set with `SET NAMES`.
    pub fn set_charset(&mut self, name: &str) -> Result<(), Error> {
        if name.is_empty() || !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
            return Err(Error::Connection(ConnectionError::new(
                ConnectionErrorKind::Charset,
                format!("Invalid character set name: {name:?}"),
            )));
        }
        self.execute_simple(&format!("SET NAMES {name}"))
            .map_err(|e| {
                let code = e.code();
                Error::Connection(ConnectionError {
                    kind: ConnectionErrorKind::Charset,
                    code,
                    message: format!("Cannot set character set {name}: {e}"),
                    source: Some(Box::new(e)),
                })
            })?;
        if let Some(id) = charset::collation_for(name) {
            self.config.charset = id;
        }
        debug!(charset = name, "MySQL character set changed");
        Ok(())
    }

    /// Send `COM_QUIT`. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<(), Error> {
        if self.state == ConnectionState::Closed {
            return Ok(());
        }
        let sent = self.send_command(Command::Quit, &[]);
        self.state = ConnectionState::Closed;
        debug!(
            connection_id = self.handshake.connection_id,
            "MySQL connection closed"
        );
        // The server may already be gone; a failed QUIT still closes us
        if let Err(e) = sent {
            trace!(error = %e, "COM_QUIT not delivered");
        }
        Ok(())
    }

    fn read_packet(&mut self) -> Result<Vec<u8>, Error> {
        match read_packet(&mut self.stream) {
            Ok((payload, seq)) => {
                self.sequence_id = seq.wrapping_add(1);
                Ok(payload)
            }
            Err(e) => {
                self.state = ConnectionState::Closed;
                Err(e)
            }
        }
    }

    fn write_packet(&mut self, payload: &[u8]) -> Result<(), Error> {
        let (bytes, next) = frame_packets(payload, self.sequence_id);
        self.sequence_id = next;
        let written = self
            .stream
            .write_all(&bytes)
            .and_then(|()| self.stream.flush());
        written.map_err(|e| {
            self.state = ConnectionState::Closed;
            disconnected("Failed to write packet", e)
        })
    }
}

impl<S: Read + Write + Send> SqlClient for MySqlConnection<S> {
    fn query(&mut self, sql: &str) -> rwsplit_core::Result<QueryResult> {
        MySqlConnection::query(self, sql)
    }

    fn escape_string(&self, raw: &str) -> String {
        escape_string(raw, self.no_backslash_escapes())
    }

    fn set_charset(&mut self, name: &str) -> rwsplit_core::Result<()> {
        MySqlConnection::set_charset(self, name)
    }

    fn set_autocommit(&mut self, enabled: bool) -> rwsplit_core::Result<()> {
        self.execute_simple(if enabled {
            "SET autocommit=1"
        } else {
            "SET autocommit=0"
        })
    }

    fn commit(&mut self) -> rwsplit_core::Result<()> {
        self.execute_simple("COMMIT")
    }

    fn rollback(&mut self) -> rwsplit_core::Result<()> {
        self.execute_simple("ROLLBACK")
    }

    fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    fn last_insert_id(&self) -> u64 {
        self.last_insert_id
    }

    fn stat(&mut self) -> rwsplit_core::Result<String> {
        self.statistics()
    }

    fn server_version(&self) -> u32 {
        self.server_version_number()
    }

    fn close(&mut self) -> rwsplit_core::Result<()> {
        MySqlConnection::close(self)
    }
}

/// Read one logical packet, joining continuation packets.
fn read_packet<S: Read>(stream: &mut S) -> Result<(Vec<u8>, u8), Error> {
    let mut payload = Vec::new();
    loop {
        let mut header = [0u8; 4];
        stream
            .read_exact(&mut header)
            .map_err(|e| disconnected("Failed to read packet header", e))?;
        let header = PacketHeader::from_bytes(&header);
        let len = header.payload_length as usize;

        let start = payload.len();
        payload.resize(start + len, 0);
        stream
            .read_exact(&mut payload[start..])
            .map_err(|e| disconnected("Failed to read packet payload", e))?;

        if len < MAX_PACKET_SIZE {
            return Ok((payload, header.sequence_id));
        }
    }
}

fn parse_handshake(payload: &[u8]) -> Result<ServerHandshake, Error> {
    let mut reader = PacketReader::new(payload);

    let protocol_version = reader
        .read_u8()
        .ok_or_else(|| protocol_error("Missing protocol version"))?;
    if protocol_version != 10 {
        return Err(protocol_error(format!(
            "Unsupported protocol version: {protocol_version}"
        )));
    }

    let server_version = reader
        .read_null_string()
        .ok_or_else(|| protocol_error("Missing server version"))?;
    let connection_id = reader
        .read_u32_le()
        .ok_or_else(|| protocol_error("Missing connection ID"))?;
    let mut auth_data = reader
        .read_bytes(8)
        .ok_or_else(|| protocol_error("Missing auth data"))?
        .to_vec();
    reader.skip(1);

    let caps_lower = reader
        .read_u16_le()
        .ok_or_else(|| protocol_error("Missing capability flags"))?;
    let charset = reader.read_u8().unwrap_or(charset::DEFAULT_CHARSET);
    let status_flags = reader.read_u16_le().unwrap_or(0);
    let caps_upper = reader.read_u16_le().unwrap_or(0);
    let capabilities = u32::from(caps_lower) | (u32::from(caps_upper) << 16);

    let auth_data_len = usize::from(reader.read_u8().unwrap_or(0));
    reader.skip(10);

    if capabilities & capabilities::CLIENT_SECURE_CONNECTION != 0 {
        let len2 = auth_data_len.saturating_sub(8).max(13);
        if let Some(part2) = reader.read_bytes(len2) {
            auth_data.extend_from_slice(part2.strip_suffix(&[0]).unwrap_or(part2));
        }
    }

    let auth_plugin = if capabilities & capabilities::CLIENT_PLUGIN_AUTH != 0 {
        reader.read_null_string().unwrap_or_default()
    } else {
        auth::plugins::MYSQL_NATIVE_PASSWORD.to_string()
    };

    Ok(ServerHandshake {
        capabilities,
        server_version,
        connection_id,
        auth_plugin,
        auth_data,
        charset,
        status_flags,
    })
}

fn parse_column_def(data: &[u8]) -> Result<ColumnDef, Error> {
    let mut reader = PacketReader::new(data);
    let mut field = |what: &str| {
        reader
            .read_lenenc_string()
            .ok_or_else(|| protocol_error(format!("Missing {what} in column definition")))
    };
    let _catalog = field("catalog")?;
    let schema = field("schema")?;
    let table = field("table")?;
    let _org_table = field("org_table")?;
    let name = field("name")?;
    let _org_name = field("org_name")?;

    let fixed = (|| {
        let _fixed_len = reader.read_lenenc_int()?;
        Some((
            reader.read_u16_le()?,
            reader.read_u32_le()?,
            reader.read_u8()?,
            reader.read_u16_le()?,
            reader.read_u8()?,
        ))
    })();
    let (charset, column_length, column_type, flags, decimals) =
        fixed.ok_or_else(|| protocol_error("Truncated column definition"))?;

    Ok(ColumnDef {
        schema,
        table,
        name,
        charset,
        column_length,
        column_type: FieldType::from_u8(column_type),
        flags,
        decimals,
    })
}

fn parse_text_row(data: &[u8], columns: &[ColumnDef], info: &Arc<ColumnInfo>) -> Result<Row, Error> {
    let mut reader = PacketReader::new(data);
    let mut values = Vec::with_capacity(columns.len());
    for column in columns {
        if reader.peek() == Some(0xFB) {
            reader.skip(1);
            values.push(Value::Null);
            continue;
        }
        let cell = reader
            .read_lenenc_bytes()
            .ok_or_else(|| protocol_error(format!("Truncated value for column {}", column.name)))?;
        values.push(column.decode(cell));
    }
    Ok(Row::with_columns(Arc::clone(info), values))
}

/// `8.0.36-0ubuntu0.22.04.1` -> 80036. Missing components count as zero.
fn version_number(version: &str) -> u32 {
    let mut parts = version.split('.').map(|part| {
        let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
        digits.parse::<u32>().unwrap_or(0)
    });
    let major = parts.next().unwrap_or(0);
    let minor = parts.next().unwrap_or(0);
    let patch = parts.next().unwrap_or(0);
    major
        .saturating_mul(10_000)
        .saturating_add(minor.saturating_mul(100))
        .saturating_add(patch)
}

fn protocol_error(msg: impl Into<String>) -> Error {
    Error::Protocol(ProtocolError {
        message: msg.into(),
        raw_data: None,
        source: None,
    })
}

fn auth_error(msg: impl Into<String>) -> Error {
    Error::Connection(ConnectionError::new(
        ConnectionErrorKind::Authentication,
        msg,
    ))
}

fn connection_error(msg: impl Into<String>) -> Error {
    Error::Connection(ConnectionError::new(ConnectionErrorKind::Connect, msg))
}

fn disconnected(context: &str, e: std::io::Error) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Disconnected,
        code: None,
        message: format!("{context}: {e}"),
        source: Some(Box::new(e)),
    })
}

/// ERR packet received while opening the session.
fn connect_error(err: &ErrPacket) -> Error {
    let kind = match err.error_code {
        1044 | 1045 | 1698 => ConnectionErrorKind::Authentication,
        1040 | 1129 | 1130 => ConnectionErrorKind::Refused,
        _ => ConnectionErrorKind::Connect,
    };
    Error::Connection(ConnectionError::new(kind, err.error_message.clone()).with_code(err.error_code))
}

/// ERR packet received for a statement.
fn query_error(err: &ErrPacket) -> Error {
    let kind = match err.error_code {
        1062 | 1216 | 1217 | 1451 | 1452 | 1048 => QueryErrorKind::Constraint,
        1064 | 1149 => QueryErrorKind::Syntax,
        1146 | 1054 | 1049 => QueryErrorKind::NotFound,
        1142 | 1143 | 1044 | 1227 => QueryErrorKind::Permission,
        1205 | 1213 => QueryErrorKind::Deadlock,
        _ => QueryErrorKind::Database,
    };
    let mut q = QueryError::new(kind, err.error_message.clone());
    q.code = Some(err.error_code);
    q.sqlstate = (!err.sql_state.is_empty()).then(|| err.sql_state.clone());
    Error::Query(q)
}
