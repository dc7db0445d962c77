//! Drives a full debugging session against a scripted engine over TCP.

use dbgp_proto::{
    encode_frame, Breakpoint, ConnectOptions, Listener, SessionEvent, SessionOptions, Status,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedReceiver;

const NS: &str = r#"xmlns="urn:debugger_protocol_v1" xmlns:xdebug="https://xdebug.org/dbgp/xdebug""#;

struct Engine {
    stream: TcpStream,
}

impl Engine {
    async fn send(&mut self, xml: &str) {
        self.stream.write_all(&encode_frame(xml)).await.unwrap();
    }

    /// Next command line, without its terminator.
    async fn command(&mut self) -> String {
        let mut line = Vec::new();
        loop {
            let byte = self.stream.read_u8().await.unwrap();
            if byte == 0 {
                return String::from_utf8(line).unwrap();
            }
            line.push(byte);
        }
    }

    /// Read a command, check its name and return its transaction id.
    async fn expect(&mut self, name: &str) -> (u32, String) {
        let line = self.command().await;
        let mut words = line.split(' ');
        assert_eq!(words.next(), Some(name), "unexpected command: {line}");
        assert_eq!(words.next(), Some("-i"));
        let id = words.next().unwrap().parse().unwrap();
        (id, line)
    }

    async fn reply(&mut self, command: &str, id: u32, attrs: &str, body: &str) {
        self.send(&format!(
            r#"<response {NS} command="{command}" transaction_id="{id}" {attrs}>{body}</response>"#
        ))
        .await;
    }
}

async fn wait_for<F>(events: &mut UnboundedReceiver<SessionEvent>, mut pred: F) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    loop {
        let event = events.recv().await.expect("event stream ended");
        if pred(&event) {
            return event;
        }
    }
}

#[tokio::test]
async fn full_session_against_scripted_engine() {
    let listener = Listener::bind("127.0.0.1:0", ConnectOptions::default())
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();

    let engine = tokio::spawn(async move {
        let mut engine = Engine {
            stream: TcpStream::connect(addr).await.unwrap(),
        };
        engine
            .send(&format!(
                r#"<?xml version="1.0" encoding="iso-8859-1"?>
<init {NS} fileuri="file:///srv/index.php" language="PHP" xdebug:language_version="8.3.0" protocol_version="1.0" appid="4242" idekey="dbgp"><engine version="3.3.1"><![CDATA[Xdebug]]></engine><author><![CDATA[Derick Rethans]]></author></init>"#
            ))
            .await;

        let (id, _) = engine.expect("step_into").await;
        engine
            .reply(
                "step_into",
                id,
                r#"status="break" reason="ok""#,
                r#"<xdebug:message filename="file:///srv/index.php" lineno="3"/>"#,
            )
            .await;

        let (id, line) = engine.expect("breakpoint_set").await;
        assert!(line.contains("-t line -s enabled -f file:///srv/index.php -n 9"));
        engine.reply("breakpoint_set", id, r#"state="enabled" id="18001""#, "").await;

        let (id, _) = engine.expect("run").await;
        engine
            .reply("run", id, r#"status="break" reason="ok""#, "")
            .await;

        let (id, line) = engine.expect("stack_get").await;
        assert_eq!(line, format!("stack_get -i {id}"));
        engine
            .reply(
                "stack_get",
                id,
                "",
                r#"<stack where="handle" level="0" type="file" filename="file:///srv/index.php" lineno="9"/><stack where="{main}" level="1" type="file" filename="file:///srv/index.php" lineno="20"/>"#,
            )
            .await;

        let (id, line) = engine.expect("feature_set").await;
        assert!(line.ends_with("-n max_depth -v 0"));
        engine
            .reply("feature_set", id, r#"feature="max_depth" success="1""#, "")
            .await;
        let (id, _) = engine.expect("context_get").await;
        engine
            .reply(
                "context_get",
                id,
                r#"context="0""#,
                r#"<property name="$count" fullname="$count" type="int"><![CDATA[0012]]></property><property name="$name" fullname="$name" type="string" size="3" encoding="base64"><![CDATA[Ym9i]]></property>"#,
            )
            .await;

        let (id, _) = engine.expect("run").await;
        engine
            .reply("run", id, r#"status="stopping" reason="ok""#, "")
            .await;
    });

    let (handle, mut events, _peer) = listener.accept().await.unwrap();

    match wait_for(&mut events, |e| matches!(e, SessionEvent::Ready(_))).await {
        SessionEvent::Ready(identity) => {
            assert_eq!(identity.app_id, "4242");
            assert_eq!(identity.engine.name, "Xdebug");
            assert_eq!(identity.engine.version, "3.3.1");
            assert_eq!(
                identity.engine.info.get("author").map(String::as_str),
                Some("Derick Rethans")
            );
        }
        _ => unreachable!(),
    }
    assert_eq!(handle.status_now().await, Status::Break);

    let id = handle
        .breakpoint_set(&Breakpoint::line("file:///srv/index.php", 9))
        .await
        .unwrap();
    assert_eq!(id, "18001");

    assert_eq!(handle.run().await.unwrap(), Status::Break);

    let frames = handle.stack_get(None).await.unwrap();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].location, "handle");
    assert_eq!(frames[1].lineno, 20);

    let vars = handle.context_get(None, None).await.unwrap();
    assert_eq!(vars.len(), 2);
    assert_eq!(vars[0].value, "0012");
    assert_eq!(vars[1].value, "bob");

    assert_eq!(handle.run().await.unwrap(), Status::Stopping);
    wait_for(&mut events, |e| matches!(e, SessionEvent::Closed)).await;
    assert!(handle.is_closed().await);
    engine.await.unwrap();
}

#[tokio::test]
async fn session_without_first_line_break_is_ready_at_once() {
    let options = ConnectOptions {
        session: SessionOptions {
            break_on_first_line: false,
        },
        ..ConnectOptions::default()
    };
    let listener = Listener::bind("127.0.0.1:0", options).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let engine = tokio::spawn(async move {
        let mut engine = Engine {
            stream: TcpStream::connect(addr).await.unwrap(),
        };
        engine
            .send(&format!(
                r#"<init {NS} fileuri="file:///a.php" appid="1"><engine version="1">Xdebug</engine></init>"#
            ))
            .await;
        let (id, _) = engine.expect("status").await;
        engine
            .reply("status", id, r#"status="starting" reason="ok""#, "")
            .await;
        // Then hang up.
    });

    let (handle, mut events, _) = listener.accept().await.unwrap();
    wait_for(&mut events, |e| matches!(e, SessionEvent::Ready(_))).await;
    assert_eq!(handle.status().await.unwrap(), Status::Starting);
    engine.await.unwrap();
    wait_for(&mut events, |e| matches!(e, SessionEvent::Closed)).await;
}
