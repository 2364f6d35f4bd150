// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Observation store, delta filter and notification sender.
//!
//! Entries are keyed by `(SSID, connection type, OID, IID, RID, format)`;
//! IID 65535 and RID -1 act as wildcards, which makes `notify` a set of up
//! to three range queries over the sorted entry tree (exact target,
//! instance-level subscribers, object-level subscribers).
//!
//! Queued values reference their entry by key and the entry remembers its
//! newest queued value by serial number; both links are resolved on use,
//! never owned, so removing either side cannot dangle.

use std::{
    collections::{BTreeMap, VecDeque},
    time::Duration,
};

use bytes::Bytes;
use tracing::{debug, error, info, trace};

use crate::{
    client::{ClientTask, Lwm2mClient},
    coap::{
        msg::{FORMAT_NONE, MsgCode, MsgDetails, MsgIdentity, MsgType,
              observe_serial_value},
        stream::{NotifyMessage, NotifyReply},
    },
    dm::{
        self, attributes::{Attributes, AttrsQuery}, DataModel, Iid, IID_INVALID, ObjectRc,
        Oid, query, Ssid, UriPath,
    },
    errors::{CoreError, CoreResult},
    interface::management,
    io::{ObserveOutput, OutputSink, select_read_format},
    sched::TaskHandle,
    servers::ConnType,
    time::{RealTimestamp, real_since},
};

/// Upper bound on the encoded size of an observable value.
pub const MAX_OBSERVABLE_RESOURCE_SIZE: usize = 1024;

/// Notifications older than this are escalated from NON to CON.
const CONFIRMABLE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// RID wildcard in observation keys.
pub const RID_WILDCARD: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ConnKey {
    pub ssid: Ssid,
    pub conn_type: ConnType,
}

/// Target part of an observation key; ordering is lexicographic over the
/// tuple, which the wildcard range queries rely on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ObserveKey {
    pub oid: Oid,
    /// 65535 = wildcard ("whole object").
    pub iid: Iid,
    /// -1 = wildcard ("whole instance" or, with a wildcard IID, "whole
    /// object").
    pub rid: i32,
    pub format: u16,
}

impl ObserveKey {
    /// The data-model path this key observes.
    pub fn uri(&self) -> UriPath {
        if self.rid >= 0 {
            UriPath::Resource(self.oid, self.iid, self.rid as u16)
        } else if self.iid != IID_INVALID {
            UriPath::Instance(self.oid, self.iid)
        } else {
            UriPath::Object(self.oid)
        }
    }
}

/// One value produced for an observation, sent or awaiting send.
#[derive(Debug, Clone)]
pub struct ResourceValue {
    /// Key of the owning entry; resolved on use.
    pub key: ObserveKey,
    /// Queue serial; entries remember their newest unsent value by it.
    pub serial: u64,
    pub details: MsgDetails,
    pub identity: MsgIdentity,
    pub timestamp: RealTimestamp,
    pub numeric: f64,
    pub value: Bytes,
}

impl ResourceValue {
    pub fn is_error(&self) -> bool {
        self.details.code.is_error()
    }
}

#[derive(Debug)]
pub struct ObserveEntry {
    pub key: ObserveKey,
    pub notify_task: TaskHandle,
    pub last_confirmable: RealTimestamp,
    /// Always exactly one previously sent (or initial) value.
    pub last_sent: ResourceValue,
    /// Serial of this entry's newest value inside the connection's unsent
    /// queue, if any.
    pub last_unsent: Option<u64>,
}

#[derive(Debug, Default)]
pub struct ObserveConnection {
    pub entries: BTreeMap<ObserveKey, ObserveEntry>,
    pub flush_task: TaskHandle,
    pub unsent: VecDeque<ResourceValue>,
    next_serial: u64,
}

impl ObserveConnection {
    fn alloc_serial(&mut self) -> u64 {
        self.next_serial += 1;
        self.next_serial
    }

    /// The value that best represents the entry's current state: the
    /// newest unsent one, or the last sent one.
    pub fn newest_value<'a>(&'a self, entry: &'a ObserveEntry) -> &'a ResourceValue {
        if let Some(serial) = entry.last_unsent
            && let Some(value) = self.unsent.iter().find(|v| v.serial == serial)
        {
            return value;
        }
        &entry.last_sent
    }

    fn clear_unsent_of(&mut self, key: ObserveKey) {
        self.unsent.retain(|v| v.key != key);
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.last_unsent = None;
        }
    }
}

#[derive(Debug, Default)]
pub struct ObserveState {
    pub connections: BTreeMap<ConnKey, ObserveConnection>,
}

impl ObserveState {
    pub fn new() -> Self {
        ObserveState::default()
    }

    pub fn entry_count(&self) -> usize {
        self.connections.values().map(|c| c.entries.len()).sum()
    }
}

fn ensure_present_for_key(obj: &ObjectRc, iid: Iid, rid: i32) -> CoreResult<()> {
    if iid != IID_INVALID {
        dm::ensure_instance_present(obj, iid)?;
    }
    if rid >= 0 {
        dm::ensure_resource_supported_and_present(obj, iid, rid as u16)?;
    }
    Ok(())
}

fn get_obj_and_attrs(
    dm: &DataModel,
    ssid: Ssid,
    key: &ObserveKey,
) -> CoreResult<(ObjectRc, Attributes)> {
    let obj = dm.find(key.oid).ok_or(CoreError::NotFound)?;
    ensure_present_for_key(&obj, key.iid, key.rid)?;
    let attrs = crate::dm::attributes::effective_attrs(
        dm,
        &AttrsQuery {
            obj: &obj,
            iid: (key.iid != IID_INVALID).then_some(key.iid),
            rid: (key.rid >= 0).then_some(key.rid as u16),
            ssid,
            with_server_defaults: true,
        },
    )?;
    Ok((obj, attrs))
}

fn get_attrs(dm: &DataModel, ssid: Ssid, key: &ObserveKey) -> CoreResult<Attributes> {
    get_obj_and_attrs(dm, ssid, key).map(|(_, attrs)| attrs)
}

/// Re-arms the periodic trigger of an entry, measuring the period from its
/// newest value's realtime timestamp. `None` period means "never".
fn schedule_trigger(
    client: &mut Lwm2mClient,
    conn: ConnKey,
    key: ObserveKey,
    period: Option<i64>,
) {
    let Some(period) = period else {
        return;
    };
    let real_now = client.clock.real_now();
    let Some(connection) = client.observe.connections.get(&conn) else {
        return;
    };
    let Some(entry) = connection.entries.get(&key) else {
        return;
    };
    let newest_ts = connection.newest_value(entry).timestamp;
    let elapsed = real_since(real_now, newest_ts);
    let period = Duration::from_secs(period.max(0) as u64);
    let delay = period.saturating_sub(elapsed);
    let handle = entry.notify_task.clone();

    let now = client.clock.now();
    client
        .sched
        .schedule(now, delay, &handle, ClientTask::ObserveTrigger { conn, key });
}

fn insert_new_value(
    connection: &mut ObserveConnection,
    key: ObserveKey,
    details: MsgDetails,
    identity: MsgIdentity,
    timestamp: RealTimestamp,
    numeric: f64,
    data: Bytes,
) {
    let serial = connection.alloc_serial();
    connection.unsent.push_back(ResourceValue {
        key,
        serial,
        details,
        identity,
        timestamp,
        numeric,
        value: data,
    });
    if let Some(entry) = connection.entries.get_mut(&key) {
        entry.last_unsent = Some(serial);
    }
}

/// Records an error state for the entry instead of a value; errors are
/// never overwritten by later triggers.
fn insert_error(
    client: &mut Lwm2mClient,
    conn: ConnKey,
    key: ObserveKey,
    error: &CoreError,
) {
    let timestamp = client.clock.real_now();
    let Some(connection) = client.observe.connections.get_mut(&conn) else {
        return;
    };
    let identity = match connection.entries.get(&key) {
        Some(entry) => connection.newest_value(entry).identity.clone(),
        None => return,
    };
    if let Some(entry) = connection.entries.get(&key) {
        client.sched.del(&entry.notify_task);
    }
    let details = MsgDetails {
        msg_type: MsgType::NonConfirmable,
        code: error.response_code(),
        format: FORMAT_NONE,
        observe_serial: true,
        location_path: Vec::new(),
    };
    insert_new_value(
        connection,
        key,
        details,
        identity,
        timestamp,
        f64::NAN,
        Bytes::new(),
    );
}

fn delete_connection_if_empty(client: &mut Lwm2mClient, conn: ConnKey) {
    let empty = client
        .observe
        .connections
        .get(&conn)
        .is_some_and(|c| c.entries.is_empty());
    if empty && let Some(connection) = client.observe.connections.remove(&conn) {
        client.sched.del(&connection.flush_task);
    }
}

/// Installs (or replaces) an observation entry. The initial value counts
/// as already sent even though we never actually sent it.
pub fn observe_put_entry(
    client: &mut Lwm2mClient,
    conn: ConnKey,
    key: ObserveKey,
    details: &MsgDetails,
    identity: &MsgIdentity,
    numeric: f64,
    data: &[u8],
) -> CoreResult<()> {
    debug_assert!(key.rid >= RID_WILDCARD && key.rid <= i32::from(u16::MAX));

    // Drop any previous state for this key.
    if let Some(connection) = client.observe.connections.get_mut(&conn)
        && let Some(previous) = connection.entries.remove(&key)
    {
        client.sched.del(&previous.notify_task);
        connection.clear_unsent_of(key);
    }

    let attrs = match get_attrs(&client.dm, conn.ssid, &key) {
        Ok(attrs) => attrs,
        Err(err) => {
            error!("could not put OBSERVE entry for {}", key.uri());
            delete_connection_if_empty(client, conn);
            return Err(err);
        },
    };

    let timestamp = client.clock.real_now();
    let connection = client.observe.connections.entry(conn).or_default();
    let serial = connection.alloc_serial();
    connection.entries.insert(
        key,
        ObserveEntry {
            key,
            notify_task: TaskHandle::new(),
            last_confirmable: timestamp,
            last_sent: ResourceValue {
                key,
                serial,
                details: details.clone(),
                identity: identity.clone(),
                timestamp,
                numeric,
                value: Bytes::copy_from_slice(data),
            },
            last_unsent: None,
        },
    );
    schedule_trigger(client, conn, key, attrs.max_period);
    Ok(())
}

/// Removes one entry; the connection dies with its last entry.
pub fn observe_remove_entry(client: &mut Lwm2mClient, conn: ConnKey, key: ObserveKey) {
    if let Some(connection) = client.observe.connections.get_mut(&conn)
        && let Some(entry) = connection.entries.remove(&key)
    {
        client.sched.del(&entry.notify_task);
        connection.clear_unsent_of(key);
    }
    delete_connection_if_empty(client, conn);
}

/// Cancel-Observe by RST: removes the first entry whose newest value went
/// out with the given message id.
pub fn observe_remove_by_msg_id(client: &mut Lwm2mClient, msg_id: u16) {
    let mut found = None;
    'outer: for (conn_key, connection) in &client.observe.connections {
        for (key, entry) in &connection.entries {
            if connection.newest_value(entry).identity.msg_id == msg_id {
                found = Some((*conn_key, *key));
                break 'outer;
            }
        }
    }
    if let Some((conn, key)) = found {
        debug!("Cancel Observe {:04X}", msg_id);
        observe_remove_entry(client, conn, key);
    }
}

/// Drops observation state of connections whose SSID is no longer known.
pub fn observe_gc(client: &mut Lwm2mClient) {
    let known = client.servers.ssids();
    let stale: Vec<ConnKey> = client
        .observe
        .connections
        .keys()
        .filter(|k| !known.contains(&k.ssid))
        .copied()
        .collect();
    for conn in stale {
        if let Some(connection) = client.observe.connections.remove(&conn) {
            client.sched.del(&connection.flush_task);
            for entry in connection.entries.values() {
                client.sched.del(&entry.notify_task);
            }
        }
    }
}

/// Schedules an immediate flush of a connection's unsent queue,
/// de-duplicated through the connection's flush handle.
pub fn observe_sched_flush(client: &mut Lwm2mClient, conn: ConnKey) {
    let Some(connection) = client.observe.connections.get(&conn) else {
        trace!("skipping notification flush scheduling: no connection");
        return;
    };
    if connection.flush_task.is_scheduled() {
        trace!("skipping notification flush scheduling: already scheduled");
        return;
    }
    let handle = connection.flush_task.clone();
    let now = client.clock.now();
    client
        .sched
        .schedule_now(now, &handle, ClientTask::ObserveFlush { conn });
}

fn notify_entry(
    client: &mut Lwm2mClient,
    conn: ConnKey,
    key: ObserveKey,
) -> CoreResult<()> {
    let obj = client.dm.find(key.oid).ok_or(CoreError::NotFound)?;
    ensure_present_for_key(&obj, key.iid, key.rid)?;
    let attrs = get_attrs(&client.dm, conn.ssid, &key)?;
    if let Some(connection) = client.observe.connections.get(&conn)
        && let Some(entry) = connection.entries.get(&key)
    {
        client.sched.del(&entry.notify_task);
    }
    // pmin clamped to zero: a change may fire immediately.
    schedule_trigger(client, conn, key, Some(attrs.min_period.unwrap_or(0).max(0)));
    Ok(())
}

fn matching_keys(
    connection: &ObserveConnection,
    oid: Oid,
    iid: Option<Iid>,
    rid: Option<u16>,
) -> Vec<ObserveKey> {
    let mut ranges: Vec<(ObserveKey, ObserveKey)> = Vec::new();
    let full = |oid, iid, rid| {
        (
            ObserveKey { oid, iid, rid, format: 0 },
            ObserveKey { oid, iid, rid, format: u16::MAX },
        )
    };
    match (iid, rid) {
        (Some(iid), Some(rid)) => {
            ranges.push(full(oid, iid, i32::from(rid)));
            ranges.push(full(oid, iid, RID_WILDCARD));
            ranges.push(full(oid, IID_INVALID, RID_WILDCARD));
        },
        (Some(iid), None) => {
            ranges.push((
                ObserveKey { oid, iid, rid: i32::MIN, format: 0 },
                ObserveKey { oid, iid, rid: i32::MAX, format: u16::MAX },
            ));
            ranges.push((
                ObserveKey { oid, iid: IID_INVALID, rid: i32::MIN, format: 0 },
                ObserveKey { oid, iid: IID_INVALID, rid: i32::MAX, format: u16::MAX },
            ));
        },
        _ => {
            ranges.push((
                ObserveKey { oid, iid: 0, rid: i32::MIN, format: 0 },
                ObserveKey { oid, iid: IID_INVALID, rid: i32::MAX, format: u16::MAX },
            ));
        },
    }

    let mut keys = Vec::new();
    for (lo, hi) in ranges {
        for key in connection.entries.range(lo..=hi).map(|(k, _)| *k) {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
    }
    keys
}

/// Re-evaluates every observation the change at `(oid, iid, rid)` could
/// affect. With `invert_ssid_match` false only connections of
/// `origin_ssid` are considered, with true every other connection is.
pub fn observe_notify(
    client: &mut Lwm2mClient,
    origin_ssid: Ssid,
    oid: Oid,
    iid: Option<Iid>,
    rid: Option<u16>,
    invert_ssid_match: bool,
) -> CoreResult<()> {
    if client.dm.find(oid).is_none() {
        return Err(CoreError::NotFound);
    }

    let conn_keys: Vec<ConnKey> = client
        .observe
        .connections
        .keys()
        .filter(|k| (k.ssid == origin_ssid) != invert_ssid_match)
        .copied()
        .collect();

    let mut first_error = None;
    for conn in conn_keys {
        let keys = match client.observe.connections.get(&conn) {
            Some(connection) => matching_keys(connection, oid, iid, rid),
            None => continue,
        };
        for key in keys {
            if let Err(err) = notify_entry(client, conn, key) {
                error!("could not notify observe entry {}: {err}", key.uri());
                first_error.get_or_insert(err);
            }
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Replays a drained notify queue into the observation store.
pub fn notify_perform(
    client: &mut Lwm2mClient,
    origin_ssid: Ssid,
    queue: BTreeMap<Oid, crate::dm::notify::NotifyEntry>,
) -> CoreResult<()> {
    let mut first_error = None;
    for (oid, entry) in queue {
        if entry.instances_changed {
            if let Err(err) = observe_notify(client, origin_ssid, oid, None, None, true) {
                first_error.get_or_insert(err);
            }
        }
        for (iid, rid) in entry.resources {
            if let Err(err) =
                observe_notify(client, origin_ssid, oid, Some(iid), Some(rid), true)
            {
                first_error.get_or_insert(err);
            }
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Reads the current value of an observed path into a bounded buffer.
pub fn read_for_observe(
    client: &mut Lwm2mClient,
    ssid: Ssid,
    key: &ObserveKey,
) -> CoreResult<(MsgDetails, f64, Bytes)> {
    let uri = key.uri();
    let format = select_read_format(key.format, uri.rid().is_some())?;
    let mut sink = OutputSink::for_format(format)?;
    let numeric = {
        let mut observed = ObserveOutput::new(&mut sink);
        management::dm_read_into(
            &client.dm,
            client.servers.num_non_bootstrap(),
            ssid,
            uri,
            &mut observed,
        )?;
        observed.numeric
    };
    let payload = sink.finish();
    if payload.len() > MAX_OBSERVABLE_RESOURCE_SIZE {
        error!("observed value of {} too large", uri);
        return Err(CoreError::Internal);
    }
    Ok((
        MsgDetails {
            msg_type: MsgType::Acknowledgement,
            code: MsgCode::CONTENT,
            format,
            observe_serial: true,
            location_path: Vec::new(),
        },
        numeric,
        payload,
    ))
}

fn check_range(attrs: &Attributes, value: f64) -> bool {
    match (attrs.greater_than, attrs.less_than) {
        (Some(gt), Some(lt)) => {
            if lt < gt {
                value < lt || value > gt
            } else {
                value < lt && value > gt
            }
        },
        (Some(gt), None) => value > gt,
        (None, Some(lt)) => value < lt,
        (None, None) => true,
    }
}

fn should_update(
    previous: &ResourceValue,
    attrs: &Attributes,
    details: &MsgDetails,
    numeric: f64,
    data: &[u8],
) -> bool {
    if details.format == previous.details.format && data == previous.value.as_ref() {
        return false;
    }

    if numeric.is_nan()
        || (attrs.greater_than.is_none()
            && attrs.less_than.is_none()
            && attrs.step.is_none())
    {
        return true;
    }

    if !check_range(attrs, numeric) {
        return false;
    }

    match attrs.step {
        Some(step) if !previous.numeric.is_nan() => {
            (numeric - previous.numeric).abs() >= step
        },
        _ => true,
    }
}

struct ServerState {
    active: bool,
    storing: bool,
}

fn server_state(client: &Lwm2mClient, ssid: Ssid) -> ServerState {
    let state = ServerState {
        active: client.servers.is_active(ssid),
        storing: query::notification_storing_enabled(&client.dm, ssid),
    };
    trace!(
        "observe state for SSID {ssid}: active {}, notification storing {}",
        state.active, state.storing
    );
    state
}

fn update_notification_value(
    client: &mut Lwm2mClient,
    conn: ConnKey,
    key: ObserveKey,
) -> CoreResult<()> {
    {
        let Some(connection) = client.observe.connections.get(&conn) else {
            return Ok(());
        };
        let Some(entry) = connection.entries.get(&key) else {
            return Ok(());
        };
        // Never overwrite a pending error report.
        if connection.newest_value(entry).is_error() {
            return Ok(());
        }
    }

    let (_, attrs) = get_obj_and_attrs(&client.dm, conn.ssid, &key)?;
    let real_now = client.clock.real_now();

    let (mut details, numeric, payload) = read_for_observe(client, conn.ssid, &key)?;
    details.msg_type = MsgType::NonConfirmable;

    {
        let Some(connection) = client.observe.connections.get_mut(&conn) else {
            return Ok(());
        };
        let Some(entry) = connection.entries.get(&key) else {
            return Ok(());
        };
        let newest = connection.newest_value(entry);
        let force = attrs
            .max_period
            .is_some_and(|pmax| real_since(real_now, newest.timestamp).as_secs() >= pmax.max(0) as u64);
        if force || should_update(newest, &attrs, &details, numeric, &payload) {
            let identity = newest.identity.clone();
            insert_new_value(connection, key, details, identity, real_now, numeric, payload);
        }
    }

    schedule_trigger(client, conn, key, attrs.max_period);
    Ok(())
}

/// The periodic/triggered evaluation task of one observation entry.
pub fn observe_trigger(client: &mut Lwm2mClient, conn: ConnKey, key: ObserveKey) -> CoreResult<()> {
    if !client.observe.connections.contains_key(&conn) {
        return Ok(());
    }
    let state = server_state(client, conn.ssid);
    if !state.active && !state.storing {
        return Ok(());
    }

    if let Err(err) = update_notification_value(client, conn, key) {
        insert_error(client, conn, key, &err);
    }
    if state.active {
        observe_sched_flush(client, conn);
    }
    Ok(())
}

fn remove_all_unsent(client: &mut Lwm2mClient, conn: ConnKey) {
    if let Some(connection) = client.observe.connections.get_mut(&conn) {
        while let Some(value) = connection.unsent.pop_front() {
            if let Some(entry) = connection.entries.get_mut(&value.key)
                && entry.last_unsent == Some(value.serial)
            {
                entry.last_unsent = None;
            }
        }
    }
}

/// Sends the head of the unsent queue. On success the value is committed
/// as the entry's `last_sent` with the channel-assigned message id.
fn send_unsent_head(client: &mut Lwm2mClient, conn: ConnKey) -> CoreResult<NotifyReply> {
    client.prepare_server_socket(conn.ssid)?;

    let real_now = client.clock.real_now();
    let (token, mut details, payload) = {
        let connection = client
            .observe
            .connections
            .get(&conn)
            .ok_or(CoreError::Internal)?;
        let head = connection.unsent.front().ok_or(CoreError::Internal)?;
        let entry = connection.entries.get(&head.key).ok_or(CoreError::Internal)?;
        let mut details = head.details.clone();
        if real_since(real_now, entry.last_confirmable) >= CONFIRMABLE_INTERVAL {
            details.msg_type = MsgType::Confirmable;
        }
        (head.identity.token.clone(), details, head.value.clone())
    };

    let notify = NotifyMessage {
        token,
        details: details.clone(),
        observe: observe_serial_value(real_now),
        payload,
    };

    let result = {
        let Lwm2mClient {
            servers,
            channel,
            cfg,
            ..
        } = client;
        let server = servers.find_mut(conn.ssid).ok_or(CoreError::NotFound)?;
        let sock = server
            .udp_connection
            .socket
            .as_deref_mut()
            .ok_or(CoreError::Internal)?;
        channel.send_notify(sock, &cfg.tx_params, &notify)
    };
    client.release_server_stream(conn.ssid);

    let sent = result?;
    if sent.reply == NotifyReply::Reset {
        return Ok(NotifyReply::Reset);
    }

    // Commit: the head becomes the entry's last_sent.
    if let Some(connection) = client.observe.connections.get_mut(&conn)
        && let Some(mut value) = connection.unsent.pop_front()
    {
        value.identity.msg_id = sent.msg_id;
        if let Some(entry) = connection.entries.get_mut(&value.key) {
            if entry.last_unsent == Some(value.serial) {
                entry.last_unsent = None;
            }
            if details.msg_type == MsgType::Confirmable {
                entry.last_confirmable = real_now;
            }
            entry.last_sent = value;
        }
    }
    Ok(sent.reply)
}

fn schedule_all_triggers(client: &mut Lwm2mClient, conn: ConnKey) {
    let idle: Vec<ObserveKey> = match client.observe.connections.get(&conn) {
        Some(connection) => connection
            .entries
            .values()
            .filter(|e| !e.notify_task.is_scheduled())
            .map(|e| e.key)
            .collect(),
        None => return,
    };
    for key in idle {
        match get_attrs(&client.dm, conn.ssid, &key) {
            Ok(attrs) => schedule_trigger(client, conn, key, attrs.max_period),
            Err(_) => error!("could not schedule automatic notification trigger"),
        }
    }
}

/// Flushes a connection's unsent queue in FIFO order.
pub fn observe_flush(client: &mut Lwm2mClient, conn: ConnKey) -> CoreResult<()> {
    let mut state: Option<ServerState> = None;
    let mut result = Ok(());

    loop {
        let Some(connection) = client.observe.connections.get(&conn) else {
            return result;
        };
        let Some(head) = connection.unsent.front() else {
            break;
        };
        let head_key = head.key;
        let is_error = head.is_error();

        if state.is_none() {
            let fresh = server_state(client, conn.ssid);
            if !fresh.active {
                return result;
            }
            state = Some(fresh);
        }
        let storing = state.as_ref().map(|s| s.storing).unwrap_or(true);

        match send_unsent_head(client, conn) {
            Ok(NotifyReply::Reset) => {
                info!("Reset received as reply to notification");
                observe_remove_entry(client, conn, head_key);
            },
            Ok(_) => {
                if is_error {
                    observe_remove_entry(client, conn, head_key);
                }
            },
            Err(err) => {
                error!("could not send Observe notification: {err}");
                if !storing {
                    remove_all_unsent(client, conn);
                    if is_error {
                        observe_remove_entry(client, conn, head_key);
                    }
                }
                result = Err(err);
                break;
            },
        }
    }

    if result.is_ok()
        && client
            .observe
            .connections
            .get(&conn)
            .is_some_and(|c| c.unsent.is_empty())
    {
        schedule_all_triggers(client, conn);
    }
    result
}

