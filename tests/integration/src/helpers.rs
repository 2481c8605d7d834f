//! Test helpers: in-process fake cache-engine and MySQL-protocol
//! servers that record every command they receive, plus shortcuts for
//! building requests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use bytes::{BufMut, Bytes, BytesMut};
use dbrelay_core::{AddressResult, Backend, Credentials, Dispatcher, QueryRequest, RedisBackend};
use dbrelay_protocol::{parse_frame, Frame};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

#[derive(Default)]
struct Store {
    strings: HashMap<String, Bytes>,
    lists: HashMap<String, VecDeque<Bytes>>,
}

/// A fake cache engine on an ephemeral port.
///
/// Understands enough commands to drive the adapter and the precheck:
/// AUTH, SELECT, PING, GET, SET, STRLEN, DEL, RPUSH, LLEN and LRANGE.
/// Everything else gets an `ERR unknown command` reply.
pub struct FakeRedis {
    pub address: String,
    store: Arc<Mutex<Store>>,
    log: Arc<Mutex<Vec<Vec<String>>>>,
}

impl FakeRedis {
    pub async fn start() -> Self {
        Self::start_with_password(None).await
    }

    /// Starts a server that rejects everything until `AUTH password`.
    pub async fn start_with_password(password: Option<&str>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let store = Arc::new(Mutex::new(Store::default()));
        let log = Arc::new(Mutex::new(Vec::new()));
        let password = password.map(str::to_string);

        let (s, l) = (Arc::clone(&store), Arc::clone(&log));
        tokio::spawn(async move {
            while let Ok((sock, _)) = listener.accept().await {
                let session = Session {
                    store: Arc::clone(&s),
                    log: Arc::clone(&l),
                    password: password.clone(),
                    authed: password.is_none(),
                };
                tokio::spawn(session.run(sock));
            }
        });

        Self {
            address,
            store,
            log,
        }
    }

    pub fn set(&self, key: &str, value: Vec<u8>) {
        let mut store = self.store.lock().unwrap();
        store.strings.insert(key.to_string(), Bytes::from(value));
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.store.lock().unwrap().strings.get(key).cloned()
    }

    pub fn push(&self, key: &str, items: &[&str]) {
        let mut store = self.store.lock().unwrap();
        let list = store.lists.entry(key.to_string()).or_default();
        list.extend(items.iter().map(|i| Bytes::copy_from_slice(i.as_bytes())));
    }

    /// Every command received so far, names uppercased.
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.log.lock().unwrap().clone()
    }

    /// Just the command names.
    pub fn command_names(&self) -> Vec<String> {
        self.commands().into_iter().map(|c| c[0].clone()).collect()
    }
}

struct Session {
    store: Arc<Mutex<Store>>,
    log: Arc<Mutex<Vec<Vec<String>>>>,
    password: Option<String>,
    authed: bool,
}

impl Session {
    async fn run(mut self, mut sock: TcpStream) {
        let mut buf = BytesMut::new();
        loop {
            let frame = loop {
                if let Ok(Some((frame, n))) = parse_frame(&buf) {
                    let _ = buf.split_to(n);
                    break frame;
                }
                match sock.read_buf(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(_) => {}
                }
            };

            let mut args = match frame {
                Frame::Array(items) => items
                    .into_iter()
                    .filter_map(|f| match f {
                        Frame::Bulk(b) => Some(String::from_utf8_lossy(&b).into_owned()),
                        _ => None,
                    })
                    .collect::<Vec<_>>(),
                _ => return,
            };
            if args.is_empty() {
                return;
            }
            args[0] = args[0].to_ascii_uppercase();
            self.log.lock().unwrap().push(args.clone());

            let mut out = BytesMut::new();
            self.reply(&args).serialize(&mut out);
            if sock.write_all(&out).await.is_err() {
                return;
            }
        }
    }

    fn reply(&mut self, args: &[String]) -> Frame {
        let cmd = args[0].as_str();
        if cmd == "AUTH" {
            let given = args.last().cloned().unwrap_or_default();
            return match self.password {
                Some(ref p) if *p == given => {
                    self.authed = true;
                    Frame::Simple("OK".into())
                }
                Some(_) => Frame::Error("WRONGPASS invalid username-password pair".into()),
                None => Frame::Error("ERR AUTH called without any password configured".into()),
            };
        }
        if !self.authed {
            return Frame::Error("NOAUTH Authentication required.".into());
        }

        let mut store = self.store.lock().unwrap();
        let key = args.get(1).cloned().unwrap_or_default();
        match cmd {
            "PING" => Frame::Simple("PONG".into()),
            "SELECT" => Frame::Simple("OK".into()),
            "GET" => match store.strings.get(&key) {
                Some(v) => Frame::Bulk(v.clone()),
                None => Frame::Null,
            },
            "SET" if args.len() == 3 => {
                store
                    .strings
                    .insert(key, Bytes::copy_from_slice(args[2].as_bytes()));
                Frame::Simple("OK".into())
            }
            "STRLEN" => Frame::Integer(store.strings.get(&key).map_or(0, |v| v.len() as i64)),
            "DEL" => {
                let mut n = 0;
                for k in &args[1..] {
                    if store.strings.remove(k).is_some() || store.lists.remove(k).is_some() {
                        n += 1;
                    }
                }
                Frame::Integer(n)
            }
            "RPUSH" => {
                let list = store.lists.entry(key).or_default();
                list.extend(args[2..].iter().map(|a| Bytes::copy_from_slice(a.as_bytes())));
                Frame::Integer(list.len() as i64)
            }
            "LLEN" => Frame::Integer(store.lists.get(&key).map_or(0, |l| l.len() as i64)),
            "LRANGE" => {
                let list = store.lists.get(&key).cloned().unwrap_or_default();
                let len = list.len() as i64;
                let resolve = |s: &str| {
                    let i: i64 = s.parse().unwrap_or(0);
                    if i < 0 {
                        (len + i).max(0)
                    } else {
                        i
                    }
                };
                let start = resolve(&args[2]);
                let stop = resolve(&args[3]).min(len - 1);
                let items = if start > stop {
                    Vec::new()
                } else {
                    list.range(start as usize..=stop as usize)
                        .cloned()
                        .map(Frame::Bulk)
                        .collect()
                };
                Frame::Array(items)
            }
            _ => Frame::Error(format!("ERR unknown command '{}'", args[0])),
        }
    }
}

pub fn request<S: AsRef<str>>(addresses: &[S], cmds: &[&str]) -> QueryRequest {
    QueryRequest::new(
        addresses.iter().map(|s| s.as_ref().to_string()).collect(),
        cmds.iter().map(|s| s.to_string()).collect(),
    )
}

pub fn redis_backend() -> RedisBackend {
    RedisBackend::new(Credentials::default())
}

/// Runs one dispatch with its own limiter.
pub async fn dispatch<B: Backend>(backend: B, req: &QueryRequest) -> Vec<AddressResult> {
    Dispatcher::new(Arc::new(backend), Arc::new(Semaphore::new(16)))
        .run(req)
        .await
}

/// An address nothing listens on.
pub async fn closed_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);
    addr
}

/// A fake MySQL-protocol server on an ephemeral port.
///
/// Accepts any login with `mysql_native_password` and answers
/// `COM_QUERY` by statement prefix:
/// - `SET ...` and `create ...`: OK, nothing affected
/// - `insert into missing ...`: error 1146, table doesn't exist
/// - `insert`, `update`, `delete`: OK, 3 rows affected
/// - `select ...`: the `id, name, note` result set from [`FakeMySql::ROWS`]
/// - anything else: error 1064
pub struct FakeMySql {
    pub address: String,
    log: Arc<Mutex<Vec<String>>>,
}

impl FakeMySql {
    /// Rows of the `select` result set. `None` is SQL NULL.
    pub const ROWS: [[Option<&'static [u8]>; 3]; 2] = [
        [Some(b"1".as_slice()), Some(b"alice".as_slice()), None],
        [Some(b"2".as_slice()), Some(b"bob".as_slice()), Some(b"\xffraw".as_slice())],
    ];

    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let log = Arc::new(Mutex::new(Vec::new()));

        let l = Arc::clone(&log);
        tokio::spawn(async move {
            while let Ok((sock, _)) = listener.accept().await {
                tokio::spawn(mysql_session(sock, Arc::clone(&l)));
            }
        });

        Self { address, log }
    }

    /// Every statement received, in order. The session setup the driver
    /// sends right after login is left out.
    pub fn queries(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|q| !q.starts_with("SET "))
            .cloned()
            .collect()
    }
}

const CLIENT_LONG_PASSWORD: u32 = 0x0000_0001;
const CLIENT_PROTOCOL_41: u32 = 0x0000_0200;
const CLIENT_TRANSACTIONS: u32 = 0x0000_2000;
const CLIENT_SECURE_CONNECTION: u32 = 0x0000_8000;
const CLIENT_PLUGIN_AUTH: u32 = 0x0008_0000;

const COM_QUIT: u8 = 0x01;
const COM_QUERY: u8 = 0x03;
const COM_PING: u8 = 0x0e;

const SERVER_STATUS_AUTOCOMMIT: u16 = 0x0002;

const TYPE_LONG: u8 = 0x03;
const TYPE_BLOB: u8 = 0xfc;
const TYPE_VAR_STRING: u8 = 0xfd;

/// Outgoing packets of one response, numbered from `seq`.
struct Packets {
    seq: u8,
    out: BytesMut,
}

impl Packets {
    fn new(seq: u8) -> Self {
        Self {
            seq,
            out: BytesMut::new(),
        }
    }

    fn push(&mut self, payload: &[u8]) {
        let len = (payload.len() as u32).to_le_bytes();
        self.out.put_slice(&len[..3]);
        self.out.put_u8(self.seq);
        self.out.put_slice(payload);
        self.seq = self.seq.wrapping_add(1);
    }

    fn ok(mut self, affected: u8) -> Self {
        let mut p = vec![0x00, affected, 0];
        p.extend_from_slice(&SERVER_STATUS_AUTOCOMMIT.to_le_bytes());
        p.extend_from_slice(&0u16.to_le_bytes());
        self.push(&p);
        self
    }

    fn err(mut self, code: u16, state: &str, msg: &str) -> Self {
        let mut p = vec![0xff];
        p.extend_from_slice(&code.to_le_bytes());
        p.push(b'#');
        p.extend_from_slice(state.as_bytes());
        p.extend_from_slice(msg.as_bytes());
        self.push(&p);
        self
    }

    fn eof(&mut self) {
        let mut p = vec![0xfe];
        p.extend_from_slice(&0u16.to_le_bytes());
        p.extend_from_slice(&SERVER_STATUS_AUTOCOMMIT.to_le_bytes());
        self.push(&p);
    }
}

fn put_lenenc_str(p: &mut Vec<u8>, s: &[u8]) {
    // every string here is short enough for a one-byte length
    p.push(s.len() as u8);
    p.extend_from_slice(s);
}

fn handshake() -> Vec<u8> {
    let caps = CLIENT_LONG_PASSWORD
        | CLIENT_PROTOCOL_41
        | CLIENT_TRANSACTIONS
        | CLIENT_SECURE_CONNECTION
        | CLIENT_PLUGIN_AUTH;

    let mut p = vec![10];
    p.extend_from_slice(b"8.0.36\0");
    p.extend_from_slice(&7u32.to_le_bytes());
    p.extend_from_slice(b"abcdefgh");
    p.push(0);
    p.extend_from_slice(&(caps as u16).to_le_bytes());
    p.push(45);
    p.extend_from_slice(&SERVER_STATUS_AUTOCOMMIT.to_le_bytes());
    p.extend_from_slice(&((caps >> 16) as u16).to_le_bytes());
    p.push(21);
    p.extend_from_slice(&[0; 10]);
    p.extend_from_slice(b"ijklmnopqrst\0");
    p.extend_from_slice(b"mysql_native_password\0");
    p
}

fn column(name: &str, kind: u8, charset: u16) -> Vec<u8> {
    let mut p = Vec::new();
    put_lenenc_str(&mut p, b"def");
    put_lenenc_str(&mut p, b"app");
    put_lenenc_str(&mut p, b"users");
    put_lenenc_str(&mut p, b"users");
    put_lenenc_str(&mut p, name.as_bytes());
    put_lenenc_str(&mut p, name.as_bytes());
    p.push(0x0c);
    p.extend_from_slice(&charset.to_le_bytes());
    p.extend_from_slice(&255u32.to_le_bytes());
    p.push(kind);
    p.extend_from_slice(&0u16.to_le_bytes());
    p.push(0);
    p.extend_from_slice(&[0, 0]);
    p
}

fn result_set() -> Packets {
    let mut out = Packets::new(1);
    out.push(&[3]);
    out.push(&column("id", TYPE_LONG, 63));
    out.push(&column("name", TYPE_VAR_STRING, 45));
    out.push(&column("note", TYPE_BLOB, 63));
    out.eof();
    for row in FakeMySql::ROWS {
        let mut p = Vec::new();
        for value in row {
            match value {
                Some(v) => put_lenenc_str(&mut p, v),
                None => p.push(0xfb),
            }
        }
        out.push(&p);
    }
    out.eof();
    out
}

fn answer(sql: &str) -> Packets {
    let lower = sql.trim().to_ascii_lowercase();
    if lower.starts_with("set ") || lower.starts_with("create ") {
        Packets::new(1).ok(0)
    } else if lower.starts_with("insert into missing") {
        Packets::new(1).err(1146, "42S02", "Table 'app.missing' doesn't exist")
    } else if ["insert", "update", "delete"].iter().any(|k| lower.starts_with(k)) {
        Packets::new(1).ok(3)
    } else if lower.starts_with("select") {
        result_set()
    } else {
        Packets::new(1).err(1064, "42000", "You have an error in your SQL syntax")
    }
}

async fn read_packet(sock: &mut TcpStream) -> Option<Vec<u8>> {
    let mut header = [0u8; 4];
    sock.read_exact(&mut header).await.ok()?;
    let len = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
    let mut payload = vec![0u8; len];
    sock.read_exact(&mut payload).await.ok()?;
    Some(payload)
}

async fn mysql_session(mut sock: TcpStream, log: Arc<Mutex<Vec<String>>>) {
    let mut greeting = Packets::new(0);
    greeting.push(&handshake());
    if sock.write_all(&greeting.out).await.is_err() {
        return;
    }
    // the login itself is never checked
    if read_packet(&mut sock).await.is_none() {
        return;
    }
    if sock.write_all(&Packets::new(2).ok(0).out).await.is_err() {
        return;
    }

    while let Some(payload) = read_packet(&mut sock).await {
        let reply = match payload.first() {
            Some(&COM_QUERY) => {
                let sql = String::from_utf8_lossy(&payload[1..]).into_owned();
                log.lock().unwrap().push(sql.clone());
                answer(&sql)
            }
            Some(&COM_PING) => Packets::new(1).ok(0),
            Some(&COM_QUIT) | None => return,
            Some(_) => Packets::new(1).err(1047, "08S01", "Unknown command"),
        };
        if sock.write_all(&reply.out).await.is_err() {
            return;
        }
    }
}
