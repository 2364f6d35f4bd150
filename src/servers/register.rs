// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Registration driver: Register / Update / De-register timing.
//!
//! Every active server owns one update job handle. Updates fire at half
//! the registration lifetime (never more often than once a second) and are
//! retried with exponential backoff; a rejected Update promotes to a full
//! Register, and a failing Register deactivates the server while the
//! backoff keeps retrying.

use std::time::Duration;

use tracing::{debug, error, warn};

use crate::{
    client::{ClientTask, Lwm2mClient},
    dm::{query, Ssid, SSID_BOOTSTRAP},
    errors::{CoreError, CoreResult},
    interface::register as register_codec,
    observe::{self, ConnKey},
    sched::{RetryBackoff, TaskHandle},
    servers::{connection::{ConnectionMode, ServerUri}, RegistrationInfo, ServerInfo},
};

/// Backoff for retryable Register/Update jobs.
pub const SERVER_RETRYABLE_BACKOFF: RetryBackoff = RetryBackoff {
    delay: Duration::from_secs(1),
    max_delay: Duration::from_secs(120),
};

/// Updates fire every `lifetime / UPDATE_INTERVAL_MARGIN_FACTOR` seconds.
const UPDATE_INTERVAL_MARGIN_FACTOR: u32 = 2;

/// Lower bound between two Updates, to avoid flooding on tiny lifetimes.
const MIN_UPDATE_INTERVAL: Duration = Duration::from_secs(1);

/// (Re)schedules the update job of one server.
pub fn schedule_update(
    client: &mut Lwm2mClient,
    ssid: Ssid,
    delay: Duration,
    reconnect: bool,
) -> CoreResult<()> {
    let handle = match client.servers.find(ssid) {
        Some(server) => server.sched_update_handle.clone(),
        None => {
            error!("no server with SSID = {ssid}");
            return Err(CoreError::NotFound);
        },
    };
    debug!("scheduling update for SSID {ssid} after {delay:?}");
    let now = client.clock.now();
    client.sched.schedule_retryable(
        now,
        delay,
        SERVER_RETRYABLE_BACKOFF,
        &handle,
        ClientTask::SendUpdate { ssid, reconnect },
    );
    Ok(())
}

/// Schedules the next periodic Update relative to registration expiry.
fn schedule_next_update(client: &mut Lwm2mClient, ssid: Ssid) -> CoreResult<()> {
    let now = client.clock.now();
    let delay = match client
        .servers
        .find(ssid)
        .and_then(|s| s.registration.as_ref())
    {
        Some(registration) => {
            let remaining = registration.expire_at.saturating_since(now);
            let interval = Duration::from_secs(
                registration.lifetime_s.max(0) as u64
                    / u64::from(UPDATE_INTERVAL_MARGIN_FACTOR),
            );
            remaining.saturating_sub(interval).max(MIN_UPDATE_INTERVAL)
        },
        None => MIN_UPDATE_INTERVAL,
    };
    schedule_update(client, ssid, delay, false)
}

/// Schedules an immediate full Register on a detached retryable handle, so
/// a pending update job is not disturbed.
fn force_reregister(client: &mut Lwm2mClient, ssid: Ssid) {
    let now = client.clock.now();
    client.sched.schedule_retryable(
        now,
        Duration::ZERO,
        SERVER_RETRYABLE_BACKOFF,
        &TaskHandle::new(),
        ClientTask::Register { ssid },
    );
}

/// The Register job. Failure deactivates the server; the scheduler's
/// backoff keeps retrying until it succeeds or the server disappears.
pub fn register_job(client: &mut Lwm2mClient, ssid: Ssid) -> CoreResult<()> {
    if client.servers.find(ssid).is_none() {
        debug!("ignoring Register for SSID {ssid}: server no longer known");
        return Ok(());
    }

    let result = try_register(client, ssid);
    if let Err(err) = &result {
        error!("could not register to server {ssid}: {err}");
        if let Some(server) = client.servers.find_mut(ssid) {
            server.active = false;
        }
    }
    result
}

fn try_register(client: &mut Lwm2mClient, ssid: Ssid) -> CoreResult<()> {
    client.prepare_server_socket(ssid)?;

    let lifetime_s = query::server_lifetime(&client.dm, ssid);
    let binding = query::server_binding(&client.dm, ssid);
    let links = register_codec::object_links(&client.dm)?;
    let request = register_codec::register_request(
        &register_codec::RegisterParams {
            endpoint_name: &client.cfg.endpoint_name,
            lifetime_s,
            binding: &binding,
        },
        links,
    );

    let response = client.exchange(ssid, &request);
    client.release_server_stream(ssid);
    let location = register_codec::parse_register_response(&response?)?;

    let now = client.clock.now();
    let expire_at = now.saturating_add(Duration::from_secs(lifetime_s.max(0) as u64));
    if let Some(server) = client.servers.find_mut(ssid) {
        server.registration = Some(RegistrationInfo {
            location,
            lifetime_s,
            expire_at,
        });
        server.active = true;
        let handle = server.sched_update_handle.clone();
        client.sched.del(&handle);
    }
    schedule_next_update(client, ssid)?;
    observe::observe_sched_flush(
        client,
        ConnKey {
            ssid,
            conn_type: crate::servers::ConnType::Udp,
        },
    );
    Ok(())
}

fn send_update(client: &mut Lwm2mClient, ssid: Ssid) -> CoreResult<()> {
    let lifetime_s = query::server_lifetime(&client.dm, ssid);
    let binding = query::server_binding(&client.dm, ssid);
    let registration = client
        .servers
        .find(ssid)
        .and_then(|s| s.registration.clone())
        .ok_or(CoreError::Internal)?;

    let links = register_codec::object_links(&client.dm)?;
    let request = register_codec::update_request(
        &register_codec::UpdateParams {
            location: &registration.location,
            lifetime_s: (lifetime_s != registration.lifetime_s).then_some(lifetime_s),
            binding: (binding != "U").then_some(&binding),
        },
        links,
    );

    let response = client.exchange(ssid, &request);
    client.release_server_stream(ssid);

    match register_codec::parse_update_response(&response?) {
        Ok(()) => {
            let now = client.clock.now();
            if let Some(server) = client.servers.find_mut(ssid)
                && let Some(registration) = server.registration.as_mut()
            {
                registration.lifetime_s = lifetime_s;
                registration.expire_at =
                    now.saturating_add(Duration::from_secs(lifetime_s.max(0) as u64));
            }
            observe::observe_sched_flush(
                client,
                ConnKey {
                    ssid,
                    conn_type: crate::servers::ConnType::Udp,
                },
            );
            Ok(())
        },
        Err(CoreError::RegistrationRejected) => {
            debug!("update rejected for SSID = {ssid}; re-registering");
            force_reregister(client, ssid);
            Ok(())
        },
        Err(err) => {
            error!("could not send registration update: {err}");
            Err(err)
        },
    }
}

fn update_or_reregister(client: &mut Lwm2mClient, ssid: Ssid) -> CoreResult<()> {
    let now = client.clock.now();
    let expired = match client
        .servers
        .find(ssid)
        .and_then(|s| s.registration.as_ref())
    {
        Some(registration) => registration.expire_at.saturating_since(now) == Duration::ZERO,
        None => true,
    };
    if expired {
        debug!("registration lifetime expired for SSID = {ssid}, forcing re-register");
        force_reregister(client, ssid);
        Ok(())
    } else {
        send_update(client, ssid)
    }
}

/// The periodic Update job.
pub fn send_update_job(client: &mut Lwm2mClient, ssid: Ssid, reconnect: bool) -> CoreResult<()> {
    if !client.servers.is_active(ssid) {
        return Err(CoreError::NotFound);
    }

    if reconnect
        && let Some(server) = client.servers.find_mut(ssid)
    {
        server.udp_connection.suspend()?;
    }
    client.prepare_server_socket(ssid)?;

    let is_bootstrap = ssid == SSID_BOOTSTRAP;
    if reconnect && is_bootstrap {
        let mut bootstrap = client.bootstrap.take();
        let result = match bootstrap.as_mut() {
            Some(policy) => policy.update_reconnected(),
            None => Ok(()),
        };
        client.bootstrap = bootstrap;
        result?;
    }
    if !is_bootstrap {
        update_or_reregister(client, ssid)?;
    }

    // Updates are retryable, so rescheduling only happens after success.
    schedule_next_update(client, ssid)
}

/// Best-effort De-register; transport errors are logged and swallowed.
pub fn deregister(client: &mut Lwm2mClient, ssid: Ssid) {
    let Some(location) = client
        .servers
        .find(ssid)
        .and_then(|s| s.registration.as_ref())
        .map(|r| r.location.clone())
    else {
        return;
    };
    if client.prepare_server_socket(ssid).is_err() {
        warn!("could not get stream for server {ssid}, skipping De-register");
        return;
    }
    let request = register_codec::deregister_request(&location);
    if let Err(err) = client.exchange(ssid, &request) {
        error!("could not send De-Register request: {err}");
    }
    client.release_server_stream(ssid);
}

/// Rebuilds the server registry from the Security object. New SSIDs get a
/// connection and an immediate Register; vanished SSIDs are de-registered
/// and their observation state dropped.
pub fn reload_servers(client: &mut Lwm2mClient) -> CoreResult<()> {
    let Some(security) = client.dm.find(crate::dm::OID_SECURITY) else {
        return Ok(());
    };
    let security_iids = security.borrow_mut().instance_iter()?;

    let mut desired: Vec<(Ssid, u16, ServerUri, bool)> = Vec::new();
    for iid in security_iids {
        let ssid = match query::ssid_from_security_iid(&client.dm, iid) {
            Ok(ssid) => ssid,
            Err(err) => {
                warn!("skipping Security instance {iid}: {err}");
                continue;
            },
        };
        let uri = match query::security_uri(&client.dm, iid)
            .and_then(|raw| ServerUri::parse(&raw))
        {
            Ok(uri) => uri,
            Err(err) => {
                warn!("skipping Security instance {iid}: bad server URI ({err})");
                continue;
            },
        };
        let queue_mode = query::server_binding(&client.dm, ssid).contains('Q');
        desired.push((ssid, iid, uri, queue_mode));
    }

    for ssid in client.servers.ssids() {
        if !desired.iter().any(|(desired_ssid, ..)| *desired_ssid == ssid) {
            debug!("server SSID {ssid} disappeared from the data model");
            deregister(client, ssid);
            if let Some(server) = client.servers.remove(ssid) {
                client.sched.del(&server.sched_update_handle);
                client.sched.del(&server.udp_connection.queue_suspend_handle);
            }
        }
    }

    for (ssid, security_iid, uri, queue_mode) in desired {
        if client.servers.find(ssid).is_some() {
            continue;
        }
        let mut server = ServerInfo::new(ssid, security_iid, uri);
        server.udp_connection.mode = if queue_mode {
            ConnectionMode::Queue
        } else {
            ConnectionMode::Online
        };
        let handle = server.sched_update_handle.clone();
        client.servers.insert(server);
        if ssid != SSID_BOOTSTRAP {
            let now = client.clock.now();
            client.sched.schedule_retryable(
                now,
                Duration::ZERO,
                SERVER_RETRYABLE_BACKOFF,
                &handle,
                ClientTask::Register { ssid },
            );
        }
    }

    observe::observe_gc(client);
    Ok(())
}
