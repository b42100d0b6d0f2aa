//! In-process fake router for tests.
//!
//! Listens on an ephemeral localhost port and speaks enough of the binary
//! control API to exercise the client end to end: login, address lists,
//! PPP secrets and sessions, queue reads, and router-side ping. State is
//! inspectable so tests can assert on what the "device" ended up with.
//!
//! Enabled with the `test-util` feature; used by this crate's own tests
//! and by `wispctl-core`'s integration suite.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::wire;

const DEFAULT_USER: &str = "api";
const DEFAULT_PASSWORD: &str = "secret";

#[derive(Debug, Clone)]
struct ListEntry {
    id: String,
    list: String,
    address: String,
    comment: String,
}

#[derive(Debug, Clone)]
struct Secret {
    id: String,
    name: String,
    profile: String,
}

#[derive(Debug, Default)]
struct FakeState {
    identity: String,
    username: String,
    password: String,
    list_entries: Vec<ListEntry>,
    secrets: Vec<Secret>,
    active_sessions: Vec<(String, String)>, // (id, name)
    simple_queues: Vec<wire::FlatRecord>,
    queue_tree: Vec<wire::FlatRecord>,
    offline_addresses: HashSet<String>,
    fail_next: HashMap<String, u32>,
    hang_on: HashSet<String>,
    commands_seen: Vec<String>,
}

/// A fake router listening on `127.0.0.1:<ephemeral>`.
pub struct FakeRouter {
    addr: SocketAddr,
    state: Arc<Mutex<FakeState>>,
    next_id: Arc<AtomicU64>,
    accept_task: JoinHandle<()>,
}

impl Drop for FakeRouter {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

impl FakeRouter {
    /// Bind and start serving. Credentials default to `api` / `secret`.
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap_or_else(|e| panic!("fake router bind: {e}"));
        let addr = listener
            .local_addr()
            .unwrap_or_else(|e| panic!("fake router addr: {e}"));

        let state = Arc::new(Mutex::new(FakeState {
            identity: "fake-router".into(),
            username: DEFAULT_USER.into(),
            password: DEFAULT_PASSWORD.into(),
            ..FakeState::default()
        }));
        let next_id = Arc::new(AtomicU64::new(1));

        let accept_state = Arc::clone(&state);
        let accept_ids = Arc::clone(&next_id);
        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let state = Arc::clone(&accept_state);
                let ids = Arc::clone(&accept_ids);
                tokio::spawn(async move {
                    let _ = serve_connection(stream, state, ids).await;
                });
            }
        });

        Self {
            addr,
            state,
            next_id,
            accept_task,
        }
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn username(&self) -> &'static str {
        DEFAULT_USER
    }

    pub fn password(&self) -> &'static str {
        DEFAULT_PASSWORD
    }

    // ── State seeding ────────────────────────────────────────────────

    pub fn add_list_entry(&self, list: &str, address: &str, comment: &str) {
        let id = self.fresh_id();
        self.lock().list_entries.push(ListEntry {
            id,
            list: list.to_owned(),
            address: address.to_owned(),
            comment: comment.to_owned(),
        });
    }

    pub fn set_secret(&self, name: &str, profile: &str) {
        let mut state = self.lock();
        if let Some(secret) = state.secrets.iter_mut().find(|s| s.name == name) {
            secret.profile = profile.to_owned();
            return;
        }
        let id = format!("*{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        state.secrets.push(Secret {
            id,
            name: name.to_owned(),
            profile: profile.to_owned(),
        });
    }

    pub fn add_active_session(&self, name: &str) {
        let id = self.fresh_id();
        self.lock().active_sessions.push((id, name.to_owned()));
    }

    pub fn add_simple_queue(&self, name: &str, target: &str, rate: &str, bytes: &str) {
        let mut record = wire::FlatRecord::new();
        record.insert("name".into(), name.to_owned());
        record.insert("target".into(), target.to_owned());
        record.insert("rate".into(), rate.to_owned());
        record.insert("bytes".into(), bytes.to_owned());
        self.lock().simple_queues.push(record);
    }

    pub fn set_offline(&self, address: &str) {
        self.lock().offline_addresses.insert(address.to_owned());
    }

    pub fn set_online(&self, address: &str) {
        self.lock().offline_addresses.remove(address);
    }

    /// Make the next `count` invocations of `path` fail with a trap.
    pub fn fail_next(&self, path: &str, count: u32) {
        self.lock().fail_next.insert(path.to_owned(), count);
    }

    /// Make `path` never answer, so client-side deadlines fire.
    pub fn hang_on(&self, path: &str) {
        self.lock().hang_on.insert(path.to_owned());
    }

    // ── State inspection ─────────────────────────────────────────────

    pub fn in_list(&self, list: &str, address: &str) -> bool {
        self.lock()
            .list_entries
            .iter()
            .any(|e| e.list == list && e.address == address)
    }

    pub fn list_members(&self, list: &str) -> Vec<String> {
        self.lock()
            .list_entries
            .iter()
            .filter(|e| e.list == list)
            .map(|e| e.address.clone())
            .collect()
    }

    pub fn secret_profile(&self, name: &str) -> Option<String> {
        self.lock()
            .secrets
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.profile.clone())
    }

    pub fn active_sessions(&self) -> Vec<String> {
        self.lock()
            .active_sessions
            .iter()
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub fn queue_tree_names(&self) -> Vec<String> {
        self.lock()
            .queue_tree
            .iter()
            .filter_map(|r| r.get("name").cloned())
            .collect()
    }

    /// Every command path received, in arrival order.
    pub fn commands_seen(&self) -> Vec<String> {
        self.lock().commands_seen.clone()
    }

    /// Count of invocations of one command path.
    pub fn times_seen(&self, path: &str) -> usize {
        self.lock()
            .commands_seen
            .iter()
            .filter(|p| p.as_str() == path)
            .count()
    }

    fn fresh_id(&self) -> String {
        format!("*{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    #[allow(clippy::unwrap_used)]
    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }
}

// ── Connection handling ──────────────────────────────────────────────

async fn serve_connection(
    mut stream: TcpStream,
    state: Arc<Mutex<FakeState>>,
    next_id: Arc<AtomicU64>,
) -> std::io::Result<()> {
    let mut logged_in = false;

    loop {
        let Some(sentence) = read_sentence(&mut stream).await? else {
            return Ok(());
        };
        let Some((path, words)) = sentence.split_first() else {
            continue;
        };
        let path = path.clone();
        let attrs = parse_params(words, '=');
        let queries = parse_params(words, '?');

        let hang = {
            let mut guard = lock(&state);
            guard.commands_seen.push(path.clone());
            guard.hang_on.contains(&path)
        };
        if hang {
            // Hold the connection open without ever replying.
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            return Ok(());
        }

        if path == "/login" {
            let ok = {
                let guard = lock(&state);
                attrs.get("name") == Some(&guard.username)
                    && attrs.get("password") == Some(&guard.password)
            };
            if ok {
                logged_in = true;
                write_done(&mut stream, &[]).await?;
            } else {
                write_trap(&mut stream, "invalid user name or password (6)").await?;
            }
            continue;
        }

        if !logged_in {
            write_trap(&mut stream, "not logged in").await?;
            continue;
        }

        let injected = {
            let mut guard = lock(&state);
            match guard.fail_next.get_mut(&path) {
                Some(n) if *n > 0 => {
                    *n -= 1;
                    true
                }
                _ => false,
            }
        };
        if injected {
            write_trap(&mut stream, "simulated failure").await?;
            continue;
        }

        dispatch(&mut stream, &path, &attrs, &queries, &state, &next_id).await?;
    }
}

async fn dispatch(
    stream: &mut TcpStream,
    path: &str,
    attrs: &BTreeMap<String, String>,
    queries: &BTreeMap<String, String>,
    state: &Arc<Mutex<FakeState>>,
    next_id: &Arc<AtomicU64>,
) -> std::io::Result<()> {
    match path {
        "/system/identity/print" => {
            let identity = lock(state).identity.clone();
            write_re(stream, &[("name", identity.as_str())]).await?;
            write_done(stream, &[]).await
        }

        "/ip/firewall/address-list/print" => {
            let records: Vec<Vec<(String, String)>> = lock(state)
                .list_entries
                .iter()
                .filter(|e| queries.get("list").is_none_or(|l| *l == e.list))
                .filter(|e| queries.get("address").is_none_or(|a| *a == e.address))
                .map(|e| {
                    vec![
                        (".id".to_owned(), e.id.clone()),
                        ("list".to_owned(), e.list.clone()),
                        ("address".to_owned(), e.address.clone()),
                        ("comment".to_owned(), e.comment.clone()),
                    ]
                })
                .collect();
            for record in records {
                let pairs: Vec<(&str, &str)> = record
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str()))
                    .collect();
                write_re(stream, &pairs).await?;
            }
            write_done(stream, &[]).await
        }

        "/ip/firewall/address-list/add" => {
            let list = attrs.get("list").cloned().unwrap_or_default();
            let address = attrs.get("address").cloned().unwrap_or_default();
            let comment = attrs.get("comment").cloned().unwrap_or_default();
            let new_id = {
                let mut guard = lock(state);
                if guard
                    .list_entries
                    .iter()
                    .any(|e| e.list == list && e.address == address)
                {
                    None
                } else {
                    let id = format!("*{}", next_id.fetch_add(1, Ordering::Relaxed));
                    guard.list_entries.push(ListEntry {
                        id: id.clone(),
                        list,
                        address,
                        comment,
                    });
                    Some(id)
                }
            };
            match new_id {
                None => write_trap(stream, "failure: already have such entry").await,
                Some(id) => write_done(stream, &[("ret", id.as_str())]).await,
            }
        }

        "/ip/firewall/address-list/remove" => {
            let id = attrs.get(".id").cloned().unwrap_or_default();
            let removed = {
                let mut guard = lock(state);
                let before = guard.list_entries.len();
                guard.list_entries.retain(|e| e.id != id);
                guard.list_entries.len() != before
            };
            if removed {
                write_done(stream, &[]).await
            } else {
                write_trap(stream, "no such item").await
            }
        }

        "/ppp/secret/print" => {
            let records: Vec<(String, String, String)> = lock(state)
                .secrets
                .iter()
                .filter(|s| queries.get("name").is_none_or(|n| *n == s.name))
                .map(|s| (s.id.clone(), s.name.clone(), s.profile.clone()))
                .collect();
            for (id, name, profile) in records {
                write_re(
                    stream,
                    &[(".id", id.as_str()), ("name", name.as_str()), ("profile", profile.as_str())],
                )
                .await?;
            }
            write_done(stream, &[]).await
        }

        "/ppp/secret/set" => {
            let id = attrs.get(".id").cloned().unwrap_or_default();
            let profile = attrs.get("profile").cloned();
            let updated = {
                let mut guard = lock(state);
                let found = guard.secrets.iter_mut().find(|s| s.id == id);
                match (found, profile) {
                    (Some(secret), Some(profile)) => {
                        secret.profile = profile;
                        true
                    }
                    _ => false,
                }
            };
            if updated {
                write_done(stream, &[]).await
            } else {
                write_trap(stream, "no such item").await
            }
        }

        "/ppp/active/print" => {
            let records: Vec<(String, String)> = lock(state)
                .active_sessions
                .iter()
                .filter(|(_, name)| queries.get("name").is_none_or(|n| n == name))
                .cloned()
                .collect();
            for (id, name) in records {
                write_re(stream, &[(".id", id.as_str()), ("name", name.as_str())]).await?;
            }
            write_done(stream, &[]).await
        }

        "/ppp/active/remove" => {
            let id = attrs.get(".id").cloned().unwrap_or_default();
            lock(state).active_sessions.retain(|(i, _)| *i != id);
            write_done(stream, &[]).await
        }

        "/queue/simple/print" => {
            let records = lock(state).simple_queues.clone();
            for record in records {
                let pairs: Vec<(&str, &str)> = record
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str()))
                    .collect();
                write_re(stream, &pairs).await?;
            }
            write_done(stream, &[]).await
        }

        "/queue/tree/add" => {
            let name = attrs.get("name").cloned().unwrap_or_default();
            let exists = {
                let mut guard = lock(state);
                if guard
                    .queue_tree
                    .iter()
                    .any(|r| r.get("name") == Some(&name))
                {
                    true
                } else {
                    let record: wire::FlatRecord = attrs.clone();
                    guard.queue_tree.push(record);
                    false
                }
            };
            if exists {
                write_trap(stream, "failure: queue with the same name already exists").await
            } else {
                write_done(stream, &[]).await
            }
        }

        "/ping" => {
            let address = attrs.get("address").cloned().unwrap_or_default();
            let offline = lock(state).offline_addresses.contains(&address);
            if offline {
                write_re(
                    stream,
                    &[("sent", "2"), ("received", "0"), ("packet-loss", "100")],
                )
                .await?;
            } else {
                write_re(
                    stream,
                    &[
                        ("host", address.as_str()),
                        ("sent", "2"),
                        ("received", "2"),
                        ("packet-loss", "0"),
                        ("avg-rtt", "4ms"),
                    ],
                )
                .await?;
            }
            write_done(stream, &[]).await
        }

        _ => write_trap(stream, "no such command").await,
    }
}

// ── Wire helpers ─────────────────────────────────────────────────────

#[allow(clippy::unwrap_used)]
fn lock(state: &Arc<Mutex<FakeState>>) -> std::sync::MutexGuard<'_, FakeState> {
    state.lock().unwrap()
}

fn parse_params(words: &[String], sigil: char) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for word in words {
        if let Some(rest) = word.strip_prefix(sigil) {
            if let Some((key, value)) = rest.split_once('=') {
                out.insert(key.to_owned(), value.to_owned());
            }
        }
    }
    out
}

async fn read_sentence(stream: &mut TcpStream) -> std::io::Result<Option<Vec<String>>> {
    let mut words = Vec::new();
    loop {
        let first = match stream.read_u8().await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof && words.is_empty() => {
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let (extra, mut len) = wire::length_prefix(first)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        for _ in 0..extra {
            len = (len << 8) | u32::from(stream.read_u8().await?);
        }
        if len == 0 {
            if words.is_empty() {
                continue;
            }
            return Ok(Some(words));
        }
        let mut buf = vec![0u8; len as usize];
        stream.read_exact(&mut buf).await?;
        words.push(String::from_utf8_lossy(&buf).into_owned());
    }
}

async fn write_sentence(stream: &mut TcpStream, words: &[String]) -> std::io::Result<()> {
    let buf = wire::encode_sentence(words.iter().map(String::as_str));
    stream.write_all(&buf).await?;
    stream.flush().await
}

async fn write_re(stream: &mut TcpStream, pairs: &[(&str, &str)]) -> std::io::Result<()> {
    let mut words = vec!["!re".to_owned()];
    words.extend(pairs.iter().map(|(k, v)| format!("={k}={v}")));
    write_sentence(stream, &words).await
}

async fn write_done(stream: &mut TcpStream, pairs: &[(&str, &str)]) -> std::io::Result<()> {
    let mut words = vec!["!done".to_owned()];
    words.extend(pairs.iter().map(|(k, v)| format!("={k}={v}")));
    write_sentence(stream, &words).await
}

async fn write_trap(stream: &mut TcpStream, message: &str) -> std::io::Result<()> {
    write_sentence(
        stream,
        &["!trap".to_owned(), format!("=message={message}")],
    )
    .await?;
    write_sentence(stream, &["!done".to_owned()]).await
}
