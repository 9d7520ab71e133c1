//! In-process stand-in for a Redis server
//!
//! Speaks enough RESP2 for the Redis backend: GET, SET (with EX), DEL, SCAN
//! with MATCH and COUNT, and FLUSHDB. Anything else, such as the client's
//! connection setup, gets `+OK`.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

// == Stored Value ==
#[derive(Debug, Clone)]
struct Stored {
    value: String,
    expire_secs: Option<u64>,
}

#[derive(Default)]
struct State {
    store: Mutex<BTreeMap<String, Stored>>,
    commands: Mutex<Vec<Vec<String>>>,
}

// == Fake Redis ==
pub struct FakeRedis {
    addr: SocketAddr,
    state: Arc<State>,
    accepts: Arc<AtomicUsize>,
    kill: Arc<watch::Sender<u64>>,
}

impl FakeRedis {
    /// Binds an ephemeral port and starts accepting connections.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(State::default());
        let accepts = Arc::new(AtomicUsize::new(0));
        let (kill, _) = watch::channel(0u64);
        let kill = Arc::new(kill);

        let server = FakeRedis {
            addr,
            state: Arc::clone(&state),
            accepts: Arc::clone(&accepts),
            kill: Arc::clone(&kill),
        };

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accepts.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(stream, Arc::clone(&state), kill.subscribe()));
            }
        });

        server
    }

    pub fn url(&self) -> String {
        format!("redis://{}/0", self.addr)
    }

    /// Number of TCP connections accepted so far.
    pub fn accepts(&self) -> usize {
        self.accepts.load(Ordering::SeqCst)
    }

    /// Closes every open connection. Stored data survives.
    pub fn drop_connections(&self) {
        self.kill.send_modify(|round| *round += 1);
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.state.store.lock().unwrap().get(key).map(|s| s.value.clone())
    }

    /// EX seconds the key was last written with.
    pub fn expire_secs(&self, key: &str) -> Option<u64> {
        self.state.store.lock().unwrap().get(key).and_then(|s| s.expire_secs)
    }

    pub fn keys(&self) -> Vec<String> {
        self.state.store.lock().unwrap().keys().cloned().collect()
    }

    pub fn insert_raw(&self, key: &str, value: &str) {
        self.state.store.lock().unwrap().insert(
            key.to_string(),
            Stored {
                value: value.to_string(),
                expire_secs: None,
            },
        );
    }

    /// Received commands whose name is `name`, arguments included.
    pub fn commands(&self, name: &str) -> Vec<Vec<String>> {
        self.state
            .commands
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.first().is_some_and(|n| n.eq_ignore_ascii_case(name)))
            .cloned()
            .collect()
    }
}

// == Connection Loop ==
async fn serve(stream: TcpStream, state: Arc<State>, mut kill: watch::Receiver<u64>) {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);

    loop {
        let command = tokio::select! {
            biased;
            _ = kill.changed() => return,
            command = read_command(&mut reader) => command,
        };
        let Ok(Some(args)) = command else {
            return;
        };

        let reply = state.execute(&args);
        state.commands.lock().unwrap().push(args);
        if write.write_all(&reply).await.is_err() {
            return;
        }
    }
}

/// Reads one RESP array of bulk strings. `None` on a clean EOF.
async fn read_command<R>(reader: &mut R) -> io::Result<Option<Vec<String>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    let count = header(&line, '*')?;

    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        line.clear();
        reader.read_line(&mut line).await?;
        let len = header(&line, '$')?;

        let mut buf = vec![0u8; len + 2];
        reader.read_exact(&mut buf).await?;
        buf.truncate(len);
        args.push(String::from_utf8_lossy(&buf).into_owned());
    }
    Ok(Some(args))
}

fn header(line: &str, marker: char) -> io::Result<usize> {
    line.trim_end()
        .strip_prefix(marker)
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, format!("bad header {:?}", line)))
}

// == Commands ==
impl State {
    fn execute(&self, args: &[String]) -> Vec<u8> {
        let name = args.first().map(|n| n.to_ascii_uppercase()).unwrap_or_default();
        let arg = |i: usize| args.get(i).cloned().unwrap_or_default();
        let mut store = self.store.lock().unwrap();

        match name.as_str() {
            "GET" => bulk(store.get(&arg(1)).map(|s| s.value.as_str())),
            "SET" => {
                let expire_secs = option_value(args, "EX").and_then(|s| s.parse().ok());
                store.insert(
                    arg(1),
                    Stored {
                        value: arg(2),
                        expire_secs,
                    },
                );
                b"+OK\r\n".to_vec()
            }
            "DEL" => {
                let removed = args[1..].iter().filter(|k| store.remove(*k).is_some()).count();
                format!(":{}\r\n", removed).into_bytes()
            }
            "SCAN" => {
                let pattern = option_value(args, "MATCH").unwrap_or("*");
                let count = option_value(args, "COUNT")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10usize);
                let matching: Vec<&String> = store
                    .keys()
                    .filter(|k| glob_match(pattern.as_bytes(), k.as_bytes()))
                    .collect();

                // Pages through whatever still matches; the caller deletes
                // each page before asking for the next.
                let cursor = if matching.len() > count { "1" } else { "0" };
                let mut reply = b"*2\r\n".to_vec();
                reply.extend(bulk(Some(cursor)));
                let page: Vec<&String> = matching.into_iter().take(count).collect();
                reply.extend(format!("*{}\r\n", page.len()).into_bytes());
                for key in page {
                    reply.extend(bulk(Some(key)));
                }
                reply
            }
            "FLUSHDB" => {
                store.clear();
                b"+OK\r\n".to_vec()
            }
            _ => b"+OK\r\n".to_vec(),
        }
    }
}

fn option_value<'a>(args: &'a [String], option: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a.eq_ignore_ascii_case(option))
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn bulk(value: Option<&str>) -> Vec<u8> {
    match value {
        Some(v) => format!("${}\r\n{}\r\n", v.len(), v).into_bytes(),
        None => b"$-1\r\n".to_vec(),
    }
}

/// Redis glob subset: `*`, `?` and backslash escapes.
pub fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.first() {
        None => text.is_empty(),
        Some(b'*') => (0..=text.len()).any(|i| glob_match(&pattern[1..], &text[i..])),
        Some(b'?') => !text.is_empty() && glob_match(&pattern[1..], &text[1..]),
        Some(b'\\') if pattern.len() > 1 => {
            text.first() == Some(&pattern[1]) && glob_match(&pattern[2..], &text[1..])
        }
        Some(c) => text.first() == Some(c) && glob_match(&pattern[1..], &text[1..]),
    }
}
