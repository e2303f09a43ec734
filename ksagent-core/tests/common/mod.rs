//! Shared harness: a router over a MemoryCluster with one observed connection

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use ksagent_core::{
    AgentRouter, InboundCommand, MemoryCluster, OutboundFrame, RequestContext, Response,
    ResponseSink, RouterConfig, SessionConfig, SessionEvent,
};
use serde_json::Value;
use tokio::sync::mpsc;

pub const FIXTURE: &str = r#"{
    "objects": [
        {"kind": "Pod", "metadata": {"name": "web-0", "namespace": "default", "labels": {"app": "web"}},
         "spec": {"containers": [{"name": "app"}]}},
        {"kind": "Pod", "metadata": {"name": "web-1", "namespace": "default", "labels": {"app": "web"}},
         "spec": {"containers": [{"name": "app"}]}},
        {"kind": "Deployment", "metadata": {"name": "web", "namespace": "default"}, "spec": {"replicas": 2}}
    ],
    "logs": [
        {"namespace": "default", "pod": "web-0", "container": "app", "lines": ["booting", "ready"]}
    ]
}"#;

const WAIT: Duration = Duration::from_secs(2);

pub fn cluster() -> Arc<MemoryCluster> {
    Arc::new(MemoryCluster::from_fixture(FIXTURE).unwrap())
}

pub fn router(cluster: &Arc<MemoryCluster>, sessions: SessionConfig) -> AgentRouter {
    AgentRouter::new(cluster.clone(), RouterConfig::default(), sessions).unwrap()
}

/// One connection whose outbound frames are captured
pub struct Client {
    pub ctx: RequestContext,
    router: AgentRouter,
    rx: mpsc::Receiver<OutboundFrame>,
    frames: VecDeque<OutboundFrame>,
}

impl Client {
    pub fn connect(router: &AgentRouter, connection_id: &str) -> Self {
        let (sink, rx) = ResponseSink::channel(connection_id, 256);
        Self {
            ctx: router.dispatcher().context(sink),
            router: router.clone(),
            rx,
            frames: VecDeque::new(),
        }
    }

    /// Send one command and wait for its response; session frames are kept
    pub async fn call(&mut self, resource: &str, action: &str, payload: Value) -> Response {
        let command = InboundCommand {
            request_id: None,
            resource: resource.to_string(),
            action: action.to_string(),
            payload,
        };
        self.router
            .dispatcher()
            .dispatch_and_reply(&self.ctx, command)
            .await
            .unwrap();

        loop {
            match self.recv().await {
                Some(OutboundFrame::Response { response, .. }) => return response,
                Some(frame) => self.frames.push_back(frame),
                None => panic!("connection closed before response"),
            }
        }
    }

    /// Open a session and return its id
    pub async fn open(&mut self, resource: &str, action: &str, payload: Value) -> String {
        let response = self.call(resource, action, payload).await;
        assert!(response.success, "open failed: {:?}", response.error);
        response.data["sessionId"].as_str().unwrap().to_string()
    }

    /// Next pushed session frame as (session id, seq, event)
    pub async fn next_event(&mut self) -> (String, u64, SessionEvent) {
        let frame = match self.frames.pop_front() {
            Some(frame) => frame,
            None => self.recv().await.expect("connection closed"),
        };
        match frame {
            OutboundFrame::Session {
                session_id,
                seq,
                event,
                ..
            } => (session_id, seq, event),
            other => panic!("expected session frame, got {:?}", other),
        }
    }

    /// Assert nothing arrives for `quiet`
    pub async fn expect_silence(&mut self, quiet: Duration) {
        assert!(self.frames.is_empty(), "unexpected frames {:?}", self.frames);
        if let Ok(frame) = tokio::time::timeout(quiet, self.rx.recv()).await {
            panic!("unexpected frame {:?}", frame);
        }
    }

    async fn recv(&mut self) -> Option<OutboundFrame> {
        tokio::time::timeout(WAIT, self.rx.recv())
            .await
            .expect("timed out waiting for a frame")
    }
}

pub fn output(data: &str) -> SessionEvent {
    SessionEvent::Output {
        data: data.to_string(),
    }
}
