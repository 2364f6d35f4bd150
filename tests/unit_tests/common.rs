// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Shared scaffolding: a scriptable object handler, an in-memory CoAP
//! channel and a client wired to both plus a manually advanced clock.

use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap, VecDeque},
    rc::Rc,
};

use bytes::Bytes;
use lwm2m_client_rs::{
    cfg::config::Config,
    client::{Lwm2mClient, Platform},
    coap::{
        msg::{CoapMessage, CoapOption, MsgCode, MsgIdentity, MsgType, opt},
        stream::{
            CoapChannel, NotifyMessage, NotifyReply, NotifySendResult, ResponseMessage,
        },
        tx_params::CoapTxParams,
    },
    dm::{
        attributes::Attributes, execute::ExecuteCtx, Iid, ObjectHandler, ObjectRc, Oid,
        Rid, Ssid,
    },
    errors::{CoreError, CoreResult},
    io::{InputCtx, OutputCtx, Value},
    net::{SocketConfig, SocketFactory, UdpTransport},
    observe::ConnKey,
    servers::ConnType,
    time::ManualClock,
};

// ─────────────────────────────────────────────────────────────────────────────
// Mock data-model object

#[derive(Debug, Default)]
pub struct MockObject {
    pub oid: Oid,
    pub rids: Vec<Rid>,
    pub instances: BTreeMap<Iid, BTreeMap<Rid, Value>>,
    /// Multiple resources, as `(riid, value)` arrays.
    pub arrays: BTreeMap<(Iid, Rid), Vec<(u16, Value)>>,
    pub resource_attrs: HashMap<(Iid, Rid, Ssid), Attributes>,
    pub instance_attrs: HashMap<(Iid, Ssid), Attributes>,
    pub object_attrs: HashMap<Ssid, Attributes>,
    pub executed: Vec<(Iid, Rid, Vec<(u8, Vec<u8>)>)>,
    pub deletable: bool,
}

impl MockObject {
    pub fn new(oid: Oid, rids: &[Rid]) -> Rc<RefCell<MockObject>> {
        Rc::new(RefCell::new(MockObject {
            oid,
            rids: rids.to_vec(),
            deletable: true,
            ..MockObject::default()
        }))
    }

    pub fn set(&mut self, iid: Iid, rid: Rid, value: Value) {
        self.instances.entry(iid).or_default().insert(rid, value);
    }

    pub fn get(&self, iid: Iid, rid: Rid) -> Option<&Value> {
        self.instances.get(&iid).and_then(|i| i.get(&rid))
    }
}

pub fn as_object(mock: &Rc<RefCell<MockObject>>) -> ObjectRc {
    mock.clone()
}

impl ObjectHandler for MockObject {
    fn oid(&self) -> Oid {
        self.oid
    }

    fn supported_rids(&self) -> &[Rid] {
        &self.rids
    }

    fn instance_iter(&mut self) -> CoreResult<Vec<Iid>> {
        Ok(self.instances.keys().copied().collect())
    }

    fn instance_present(&mut self, iid: Iid) -> CoreResult<bool> {
        Ok(self.instances.contains_key(&iid))
    }

    fn instance_create(&mut self, iid: Option<Iid>, _ssid: Ssid) -> CoreResult<Iid> {
        let iid = iid.unwrap_or_else(|| {
            (0u16..)
                .find(|candidate| !self.instances.contains_key(candidate))
                .unwrap_or(0)
        });
        self.instances.insert(iid, BTreeMap::new());
        Ok(iid)
    }

    fn instance_remove(&mut self, iid: Iid) -> CoreResult<()> {
        if !self.deletable {
            return Err(CoreError::MethodNotAllowed);
        }
        self.instances.remove(&iid).map(|_| ()).ok_or(CoreError::NotFound)
    }

    fn instance_reset(&mut self, iid: Iid) -> CoreResult<()> {
        self.instances
            .get_mut(&iid)
            .map(BTreeMap::clear)
            .ok_or(CoreError::NotFound)
    }

    fn resource_present(&mut self, iid: Iid, rid: Rid) -> CoreResult<bool> {
        Ok(self.get(iid, rid).is_some() || self.arrays.contains_key(&(iid, rid)))
    }

    fn resource_read(
        &mut self,
        iid: Iid,
        rid: Rid,
        out: &mut dyn OutputCtx,
    ) -> CoreResult<()> {
        if let Some(entries) = self.arrays.get(&(iid, rid)) {
            return out.ret_array(entries);
        }
        let value = self.get(iid, rid).cloned().ok_or(CoreError::NotFound)?;
        out.ret(value)
    }

    fn resource_write(
        &mut self,
        iid: Iid,
        rid: Rid,
        input: &mut dyn InputCtx,
    ) -> CoreResult<()> {
        let value = match input.read_i64() {
            Ok(number) => Value::Int(number),
            Err(_) => Value::Str(input.read_string()?),
        };
        self.set(iid, rid, value);
        Ok(())
    }

    fn resource_execute(
        &mut self,
        iid: Iid,
        rid: Rid,
        args: &mut ExecuteCtx<'_>,
    ) -> CoreResult<()> {
        let mut seen = Vec::new();
        while let Some(arg) = args.next_arg()? {
            let mut value = Vec::new();
            if arg.has_value {
                let mut buf = [0u8; 16];
                loop {
                    let n = args.get_arg_value(&mut buf)?;
                    if n == 0 {
                        break;
                    }
                    value.extend_from_slice(&buf[..n]);
                }
            }
            seen.push((arg.number, value));
        }
        self.executed.push((iid, rid, seen));
        Ok(())
    }

    fn resource_read_attrs(&mut self, iid: Iid, rid: Rid, ssid: Ssid) -> CoreResult<Attributes> {
        Ok(self
            .resource_attrs
            .get(&(iid, rid, ssid))
            .copied()
            .unwrap_or_default())
    }

    fn resource_write_attrs(
        &mut self,
        iid: Iid,
        rid: Rid,
        ssid: Ssid,
        attrs: &Attributes,
    ) -> CoreResult<()> {
        self.resource_attrs.insert((iid, rid, ssid), *attrs);
        Ok(())
    }

    fn instance_read_default_attrs(&mut self, iid: Iid, ssid: Ssid) -> CoreResult<Attributes> {
        Ok(self
            .instance_attrs
            .get(&(iid, ssid))
            .copied()
            .unwrap_or_default())
    }

    fn instance_write_default_attrs(
        &mut self,
        iid: Iid,
        ssid: Ssid,
        attrs: &Attributes,
    ) -> CoreResult<()> {
        self.instance_attrs.insert((iid, ssid), *attrs);
        Ok(())
    }

    fn object_read_default_attrs(&mut self, ssid: Ssid) -> CoreResult<Attributes> {
        Ok(self.object_attrs.get(&ssid).copied().unwrap_or_default())
    }

    fn object_write_default_attrs(&mut self, ssid: Ssid, attrs: &Attributes) -> CoreResult<()> {
        self.object_attrs.insert(ssid, *attrs);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Mock CoAP channel

#[derive(Debug)]
pub struct ChannelState {
    pub incoming: VecDeque<CoapMessage>,
    pub responses: Vec<ResponseMessage>,
    pub notifies: Vec<NotifyMessage>,
    pub exchanges: Vec<CoapMessage>,
    pub exchange_replies: VecDeque<CoapMessage>,
    pub con_reply: NotifyReply,
    /// While positive, every `send_notify` fails with a transport error.
    pub fail_notifies: u32,
    pub next_msg_id: u16,
}

impl Default for ChannelState {
    fn default() -> Self {
        ChannelState {
            incoming: VecDeque::new(),
            responses: Vec::new(),
            notifies: Vec::new(),
            exchanges: Vec::new(),
            exchange_replies: VecDeque::new(),
            con_reply: NotifyReply::Acked,
            fail_notifies: 0,
            next_msg_id: 0x1000,
        }
    }
}

pub struct MockChannel(pub Rc<RefCell<ChannelState>>);

impl CoapChannel for MockChannel {
    fn receive(&mut self, _sock: &mut dyn UdpTransport) -> CoreResult<CoapMessage> {
        self.0
            .borrow_mut()
            .incoming
            .pop_front()
            .ok_or_else(|| CoreError::Channel("no pending message".to_string()))
    }

    fn send_response(
        &mut self,
        _sock: &mut dyn UdpTransport,
        _tx: &CoapTxParams,
        response: &ResponseMessage,
    ) -> CoreResult<()> {
        self.0.borrow_mut().responses.push(response.clone());
        Ok(())
    }

    fn send_notify(
        &mut self,
        _sock: &mut dyn UdpTransport,
        _tx: &CoapTxParams,
        notify: &NotifyMessage,
    ) -> CoreResult<NotifySendResult> {
        let mut state = self.0.borrow_mut();
        if state.fail_notifies > 0 {
            state.fail_notifies -= 1;
            return Err(CoreError::Channel("send failed".to_string()));
        }
        state.next_msg_id += 1;
        let msg_id = state.next_msg_id;
        state.notifies.push(notify.clone());
        let reply = if notify.details.msg_type == MsgType::Confirmable {
            state.con_reply
        } else {
            NotifyReply::None
        };
        Ok(NotifySendResult { msg_id, reply })
    }

    fn exchange(
        &mut self,
        _sock: &mut dyn UdpTransport,
        _tx: &CoapTxParams,
        request: &CoapMessage,
    ) -> CoreResult<CoapMessage> {
        let mut state = self.0.borrow_mut();
        state.exchanges.push(request.clone());
        if let Some(canned) = state.exchange_replies.pop_front() {
            return Ok(canned);
        }
        // Default behaviour of a well-behaved server: a fresh Register gets
        // its location, everything else is acknowledged with 2.04.
        let paths: Vec<&str> = request
            .options_of(opt::URI_PATH)
            .filter_map(CoapOption::as_str)
            .collect();
        if request.code == MsgCode::POST && paths == ["rd"] {
            Ok(register_response())
        } else {
            Ok(CoapMessage::new(MsgType::Acknowledgement, MsgCode::CHANGED))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Mock transport

#[derive(Debug, Default)]
pub struct NetState {
    pub connects: u32,
    pub closes: u32,
    pub online: bool,
}

pub struct MockTransport(pub Rc<RefCell<NetState>>);

impl UdpTransport for MockTransport {
    fn bind_and_connect(
        &mut self,
        _local_port: Option<u16>,
        _remote_host: &str,
        _remote_port: u16,
    ) -> CoreResult<()> {
        let mut state = self.0.borrow_mut();
        state.connects += 1;
        state.online = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.0.borrow().online
    }

    fn close(&mut self) -> CoreResult<()> {
        let mut state = self.0.borrow_mut();
        if state.online {
            state.closes += 1;
            state.online = false;
        }
        Ok(())
    }

    fn local_port(&self) -> Option<u16> {
        Some(49152)
    }

    fn session_resumed(&self) -> bool {
        false
    }
}

pub struct MockFactory(pub Rc<RefCell<NetState>>);

impl SocketFactory for MockFactory {
    fn create(&mut self, _config: &SocketConfig<'_>) -> CoreResult<Box<dyn UdpTransport>> {
        Ok(Box::new(MockTransport(self.0.clone())))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Client scaffolding

pub struct TestEnv {
    pub client: Lwm2mClient,
    pub clock: ManualClock,
    pub channel: Rc<RefCell<ChannelState>>,
    pub net: Rc<RefCell<NetState>>,
}

pub const TEST_ENDPOINT: &str = "urn:dev:os:lwm2m-client-rs-test";

/// Realtime epoch the manual clock starts at.
pub const CLOCK_EPOCH_S: i64 = 1000;

pub fn new_env() -> TestEnv {
    let channel = Rc::new(RefCell::new(ChannelState::default()));
    let net = Rc::new(RefCell::new(NetState::default()));
    let clock = ManualClock::starting_at(CLOCK_EPOCH_S);
    let platform = Platform::new(Box::new(MockChannel(channel.clone())))
        .with_clock(Box::new(clock.clone()))
        .with_sockets(Box::new(MockFactory(net.clone())));
    let client =
        Lwm2mClient::new(Config::new(TEST_ENDPOINT), platform).expect("client config");
    TestEnv {
        client,
        clock,
        channel,
        net,
    }
}

pub fn register_response() -> CoapMessage {
    CoapMessage::new(MsgType::Acknowledgement, MsgCode::CREATED)
        .with_option(CoapOption::string(opt::LOCATION_PATH, "rd"))
        .with_option(CoapOption::string(opt::LOCATION_PATH, "1a"))
}

pub struct CoreObjects {
    pub security: Rc<RefCell<MockObject>>,
    pub server: Rc<RefCell<MockObject>>,
}

/// Installs mock Security and Server objects describing the given SSIDs
/// and lets the scheduler bring every server online and registered.
pub fn setup_with_ssids(env: &mut TestEnv, ssids: &[Ssid]) -> CoreObjects {
    setup_with_ssids_binding(env, ssids, "U")
}

pub fn setup_with_ssids_binding(
    env: &mut TestEnv,
    ssids: &[Ssid],
    binding: &str,
) -> CoreObjects {
    let security = MockObject::new(0, &[0, 1, 2, 10]);
    let server = MockObject::new(1, &[0, 1, 6, 7]);
    for (index, ssid) in ssids.iter().enumerate() {
        let iid = index as Iid;
        let mut sec = security.borrow_mut();
        sec.set(iid, 0, Value::Str("coap://127.0.0.1:5683".to_string()));
        sec.set(iid, 1, Value::Bool(*ssid == 0));
        sec.set(iid, 2, Value::Int(3));
        sec.set(iid, 10, Value::Int(i64::from(*ssid)));
        drop(sec);
        let mut srv = server.borrow_mut();
        srv.set(iid, 0, Value::Int(i64::from(*ssid)));
        srv.set(iid, 1, Value::Int(86400));
        srv.set(iid, 6, Value::Bool(true));
        srv.set(iid, 7, Value::Str(binding.to_string()));
    }
    env.client
        .register_object(as_object(&security))
        .expect("register Security");
    env.client
        .register_object(as_object(&server))
        .expect("register Server");
    for ssid in ssids {
        if *ssid != 0 {
            env.channel
                .borrow_mut()
                .exchange_replies
                .push_back(register_response());
        }
    }
    env.client.sched_run().expect("initial sched_run");
    for ssid in ssids {
        if *ssid != 0 {
            assert!(
                env.client.sockets().iter().any(|key| key.ssid == *ssid),
                "server {ssid} did not come online"
            );
        }
    }
    CoreObjects { security, server }
}

pub fn conn(ssid: Ssid) -> ConnKey {
    ConnKey {
        ssid,
        conn_type: ConnType::Udp,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Request builders

pub fn con_get(path: &[&str], msg_id: u16) -> CoapMessage {
    let mut msg = CoapMessage::new(MsgType::Confirmable, MsgCode::GET)
        .with_identity(MsgIdentity::new(msg_id, Bytes::from_static(b"T")));
    for segment in path {
        msg = msg.with_option(CoapOption::string(opt::URI_PATH, segment));
    }
    msg
}

pub fn con_put(path: &[&str], msg_id: u16) -> CoapMessage {
    let mut msg = CoapMessage::new(MsgType::Confirmable, MsgCode::PUT)
        .with_identity(MsgIdentity::new(msg_id, Bytes::from_static(b"T")));
    for segment in path {
        msg = msg.with_option(CoapOption::string(opt::URI_PATH, segment));
    }
    msg
}

pub fn con_post(path: &[&str], msg_id: u16) -> CoapMessage {
    let mut msg = CoapMessage::new(MsgType::Confirmable, MsgCode::POST)
        .with_identity(MsgIdentity::new(msg_id, Bytes::from_static(b"T")));
    for segment in path {
        msg = msg.with_option(CoapOption::string(opt::URI_PATH, segment));
    }
    msg
}

pub fn con_delete(path: &[&str], msg_id: u16) -> CoapMessage {
    let mut msg = CoapMessage::new(MsgType::Confirmable, MsgCode::DELETE)
        .with_identity(MsgIdentity::new(msg_id, Bytes::from_static(b"T")));
    for segment in path {
        msg = msg.with_option(CoapOption::string(opt::URI_PATH, segment));
    }
    msg
}

/// Serves one canned request and returns the response recorded by the
/// channel.
pub fn serve_one(env: &mut TestEnv, ssid: Ssid, message: CoapMessage) -> ResponseMessage {
    env.channel.borrow_mut().incoming.push_back(message);
    env.client.serve(conn(ssid)).expect("serve");
    env.channel
        .borrow()
        .responses
        .last()
        .cloned()
        .expect("no response recorded")
}

/// Same, but the request is allowed to fail `serve` with a client error.
pub fn serve_one_lenient(env: &mut TestEnv, ssid: Ssid, message: CoapMessage) -> ResponseMessage {
    env.channel.borrow_mut().incoming.push_back(message);
    let _ = env.client.serve(conn(ssid));
    env.channel
        .borrow()
        .responses
        .last()
        .cloned()
        .expect("no response recorded")
}
