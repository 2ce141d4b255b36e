//! Loopback SOCKS5 server driven by a fixed script.
//!
//! After a successful CONNECT the server plays the destination itself: it
//! reads one HTTP request head and answers with the scripted response.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Socks5Script {
    /// Method byte sent in reply to the greeting
    pub method_reply: u8,
    /// STATUS byte of the username/password reply
    pub auth_status: u8,
    /// REP byte of the CONNECT reply
    pub connect_rep: u8,
    /// Served to the tunneled client after CONNECT succeeds
    pub http_response: Option<Vec<u8>>,
    /// Connections to accept before the server thread exits
    pub connections: usize,
}

impl Default for Socks5Script {
    fn default() -> Self {
        Self {
            method_reply: 0x00,
            auth_status: 0x00,
            connect_rep: 0x00,
            http_response: None,
            connections: 1,
        }
    }
}

/// What the server observed on one connection
#[derive(Debug, Clone, Default)]
pub struct Recorded {
    pub greeting: Vec<u8>,
    pub auth: Option<(String, String)>,
    pub connect_request: Vec<u8>,
    pub http_request: Option<String>,
}

impl Recorded {
    /// Destination port from the CONNECT request
    pub fn connect_port(&self) -> Option<u16> {
        let n = self.connect_request.len();
        (n >= 2).then(|| u16::from_be_bytes([self.connect_request[n - 2], self.connect_request[n - 1]]))
    }
}

pub struct ScriptedSocks5Server {
    pub addr: SocketAddr,
    handle: JoinHandle<Vec<Recorded>>,
}

impl ScriptedSocks5Server {
    pub fn spawn(script: Socks5Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
        let addr = listener.local_addr().expect("local addr");
        let handle = thread::spawn(move || {
            let mut seen = Vec::new();
            for _ in 0..script.connections {
                let Ok((conn, _)) = listener.accept() else { break };
                let mut rec = Recorded::default();
                let _ = serve_one(conn, &script, &mut rec);
                seen.push(rec);
            }
            seen
        });
        Self { addr, handle }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn descriptor(&self, userinfo: Option<&str>) -> String {
        match userinfo {
            Some(u) => format!("socks5://{u}@127.0.0.1:{}", self.port()),
            None => format!("socks5://127.0.0.1:{}", self.port()),
        }
    }

    /// Wait for the server thread and return what it recorded
    pub fn finish(self) -> Vec<Recorded> {
        self.handle.join().expect("server thread panicked")
    }
}

fn read_n(conn: &mut TcpStream, n: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; n];
    conn.read_exact(&mut buf)?;
    Ok(buf)
}

fn serve_one(mut conn: TcpStream, script: &Socks5Script, rec: &mut Recorded) -> io::Result<()> {
    conn.set_read_timeout(Some(Duration::from_secs(5)))?;

    let head = read_n(&mut conn, 2)?;
    let methods = read_n(&mut conn, head[1] as usize)?;
    rec.greeting = [head, methods].concat();
    conn.write_all(&[0x05, script.method_reply])?;
    match script.method_reply {
        0x00 => {}
        0x02 => {
            let ver_ulen = read_n(&mut conn, 2)?;
            let user = read_n(&mut conn, ver_ulen[1] as usize)?;
            let plen = read_n(&mut conn, 1)?;
            let pass = read_n(&mut conn, plen[0] as usize)?;
            rec.auth = Some((
                String::from_utf8_lossy(&user).into_owned(),
                String::from_utf8_lossy(&pass).into_owned(),
            ));
            conn.write_all(&[0x01, script.auth_status])?;
            if script.auth_status != 0x00 {
                return Ok(());
            }
        }
        _ => return Ok(()),
    }

    let mut request = read_n(&mut conn, 4)?;
    let addr_len = match request[3] {
        0x01 => 4,
        0x04 => 16,
        0x03 => {
            let len = read_n(&mut conn, 1)?;
            request.extend_from_slice(&len);
            len[0] as usize
        }
        _ => return Ok(()),
    };
    request.extend(read_n(&mut conn, addr_len + 2)?);
    rec.connect_request = request;

    conn.write_all(&[0x05, script.connect_rep, 0x00, 0x01, 127, 0, 0, 1, 0x04, 0x38])?;
    if script.connect_rep != 0x00 {
        return Ok(());
    }

    if let Some(response) = &script.http_response {
        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            if conn.read(&mut byte)? == 0 {
                break;
            }
            head.push(byte[0]);
        }
        rec.http_request = Some(String::from_utf8_lossy(&head).into_owned());
        conn.write_all(response)?;
    }
    Ok(())
}
