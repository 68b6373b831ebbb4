// ── Hub abstraction ──
//
// Full lifecycle management for one backend connection: the REST client,
// both WebSocket channels, ingestion into the device cache, command
// routing with optimistic bridge publishes, and health polling. One hub
// is constructed at application start and torn down at shutdown --
// nothing here is an ambient singleton.

use std::sync::{Arc, Mutex as StdMutex};

use serde_json::{Value, json};
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tilelink_api::bridge::BridgeChannel;
use tilelink_api::direct::DirectChannel;
use tilelink_api::models::{Coordinator, MmwaveFrame, Node, OtaJob, PairingNotice, Site};
use tilelink_api::transport::TransportConfig;
use tilelink_api::{ChannelState, RestClient};

use crate::command::{Command, CommandResult};
use crate::config::HubConfig;
use crate::error::CoreError;
use crate::model::{CoordinatorRecord, NodeRecord};
use crate::normalize;
use crate::store::DeviceCache;
use crate::stream::EntityStream;

const PAIRING_CHANNEL_SIZE: usize = 64;

// ── SystemHealth ─────────────────────────────────────────────────────

/// Aggregate connectivity summary for status widgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemHealth {
    pub api: bool,
    pub direct: bool,
    pub bridge: bool,
    pub overall: bool,
}

// ── DataHub ──────────────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<HubInner>`. Owns the REST client, both
/// WebSocket channels, and the device cache; downstream components read
/// the cache and issue commands through [`execute`](Self::execute).
#[derive(Clone)]
pub struct DataHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    config: HubConfig,
    rest: RestClient,
    direct: DirectChannel,
    bridge: BridgeChannel,
    cache: Arc<DeviceCache>,
    api_healthy: watch::Sender<bool>,
    pairing_tx: broadcast::Sender<Arc<PairingNotice>>,
    active_site: StdMutex<Option<String>>,
    cancel: StdMutex<Option<CancellationToken>>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl DataHub {
    /// Create a new hub from configuration. Does NOT connect -- call
    /// [`connect()`](Self::connect) to open the channels and start
    /// background ingestion.
    pub fn new(config: HubConfig) -> Result<Self, CoreError> {
        let transport = TransportConfig {
            tls: config.tls.clone(),
            timeout: config.request_timeout,
        };
        let rest = RestClient::new(
            config.api_url.clone(),
            config.auth_token.clone(),
            &transport,
        )?;
        let direct = DirectChannel::new(config.ws_url.clone(), config.reconnect.clone());
        let bridge = BridgeChannel::new(config.bridge_ws_url.clone(), config.reconnect.clone());

        let (api_healthy, _) = watch::channel(false);
        let (pairing_tx, _) = broadcast::channel(PAIRING_CHANNEL_SIZE);

        Ok(Self {
            inner: Arc::new(HubInner {
                config,
                rest,
                direct,
                bridge,
                cache: Arc::new(DeviceCache::new()),
                api_healthy,
                pairing_tx,
                active_site: StdMutex::new(None),
                cancel: StdMutex::new(None),
                task_handles: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Access the hub configuration.
    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    /// Access the underlying device cache.
    pub fn cache(&self) -> &Arc<DeviceCache> {
        &self.inner.cache
    }

    // ── Connection lifecycle ─────────────────────────────────────────

    /// Open both channels and start background ingestion and health
    /// polling. No-op while already connected.
    pub async fn connect(&self) {
        let token = {
            let mut slot = self.inner.cancel.lock().expect("cancel slot poisoned");
            if slot.as_ref().is_some_and(|t| !t.is_cancelled()) {
                warn!("hub already connected");
                return;
            }
            let token = CancellationToken::new();
            *slot = Some(token.clone());
            token
        };

        let mut handles = self.inner.task_handles.lock().await;

        // Attach ingestion before opening the sockets so the first frames
        // already have consumers.
        // Direct-channel ingestion: telemetry, presence, status, pairing.
        handles.push(tokio::spawn(ingest_telemetry(
            Arc::clone(&self.inner.cache),
            self.inner.direct.telemetry(),
            token.clone(),
        )));
        handles.push(tokio::spawn(ingest_presence(
            Arc::clone(&self.inner.cache),
            self.inner.direct.presence(),
            token.clone(),
        )));
        handles.push(tokio::spawn(ingest_status(
            Arc::clone(&self.inner.cache),
            self.inner.direct.status(),
            token.clone(),
        )));
        handles.push(tokio::spawn(forward_pairing(
            self.inner.pairing_tx.clone(),
            self.inner.direct.pairing(),
            token.clone(),
        )));

        // Health polling.
        if !self.inner.config.health_check_interval.is_zero() {
            let hub = self.clone();
            handles.push(tokio::spawn(health_task(hub, token)));
        }
        drop(handles);

        self.inner.direct.connect();
        self.inner.bridge.connect();

        info!("hub connected");
    }

    /// Tear everything down: background tasks, both channels, health state.
    pub async fn disconnect(&self) {
        let token = self.inner.cancel.lock().expect("cancel slot poisoned").take();
        if let Some(token) = token {
            token.cancel();
        }

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        drop(handles);

        self.inner.direct.disconnect().await;
        self.inner.bridge.disconnect().await;
        let _ = self.inner.api_healthy.send(false);
        debug!("hub disconnected");
    }

    // ── Site management ──────────────────────────────────────────────

    /// Load all sites.
    pub async fn load_sites(&self) -> Result<Vec<Site>, CoreError> {
        Ok(self.inner.rest.list_sites().await?)
    }

    /// Load a site, make it active, and attach the bridge subscriptions
    /// that feed its live data into the cache.
    pub async fn load_site(&self, site_id: &str) -> Result<Site, CoreError> {
        let site = self.inner.rest.get_site(site_id).await?;

        *self
            .inner
            .active_site
            .lock()
            .expect("active site poisoned") = Some(site.id.clone());

        self.subscribe_site_telemetry(&site.id).await;
        Ok(site)
    }

    /// The currently active site, if one has been loaded.
    pub fn active_site(&self) -> Option<String> {
        self.inner
            .active_site
            .lock()
            .expect("active site poisoned")
            .clone()
    }

    /// Subscribe the bridge channel to a site's node telemetry and
    /// pairing topics, forwarding into the cache and the pairing stream.
    ///
    /// The forwarding tasks end on their own when the channel tears the
    /// per-pattern streams down.
    async fn subscribe_site_telemetry(&self, site_id: &str) {
        let telemetry_rx = self
            .inner
            .bridge
            .subscribe(&format!("site/{site_id}/node/+/telemetry"))
            .await;
        let cache = Arc::clone(&self.inner.cache);
        tokio::spawn(async move {
            let mut rx = telemetry_rx;
            loop {
                match rx.recv().await {
                    Ok(payload) => cache.ingest_telemetry(&payload),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "bridge telemetry consumer lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let pairing_rx = self
            .inner
            .bridge
            .subscribe(&format!("site/{site_id}/node/+/pairing"))
            .await;
        let pairing_tx = self.inner.pairing_tx.clone();
        tokio::spawn(async move {
            let mut rx = pairing_rx;
            loop {
                match rx.recv().await {
                    Ok(payload) => match normalize::normalize_pairing(&payload) {
                        Some(notice) => {
                            debug!(node_id = %notice.node_id, phase = %notice.status, "pairing notice");
                            let _ = pairing_tx.send(Arc::new(notice));
                        }
                        None => warn!(payload = %payload, "malformed pairing payload, dropping"),
                    },
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "bridge pairing consumer lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        debug!(site_id, "subscribed to site telemetry");
    }

    // ── Device loads (REST seeds) ────────────────────────────────────

    /// Load a node and fold it into the cache.
    pub async fn load_node(&self, node_id: &str) -> Result<Node, CoreError> {
        let node = self.inner.rest.get_node(node_id).await.map_err(|e| {
            if e.is_not_found() {
                CoreError::NodeNotFound {
                    identifier: node_id.to_owned(),
                }
            } else {
                e.into()
            }
        })?;
        self.inner.cache.apply_node(NodeRecord::from(node.clone()));
        Ok(node)
    }

    /// Load a coordinator and fold it into the cache.
    pub async fn load_coordinator(&self, coord_id: &str) -> Result<Coordinator, CoreError> {
        let coordinator = self.inner.rest.get_coordinator(coord_id).await.map_err(|e| {
            if e.is_not_found() {
                CoreError::CoordinatorNotFound {
                    identifier: coord_id.to_owned(),
                }
            } else {
                e.into()
            }
        })?;
        self.inner
            .cache
            .apply_coordinator(CoordinatorRecord::from(coordinator.clone()));
        Ok(coordinator)
    }

    /// Fetch recent mmWave frames (read-only passthrough).
    pub async fn mmwave_history(&self, limit: Option<u32>) -> Result<Vec<MmwaveFrame>, CoreError> {
        Ok(self.inner.rest.mmwave_history(limit).await?)
    }

    /// Poll an OTA job (read-only passthrough).
    pub async fn ota_status(&self, job_id: &str) -> Result<OtaJob, CoreError> {
        Ok(self.inner.rest.ota_status(job_id).await?)
    }

    // ── Command execution ────────────────────────────────────────────

    /// Execute a command.
    ///
    /// The REST call is authoritative: its failure is the command's
    /// failure. When the bridge channel is connected, light-control
    /// commands are additionally published broker-side for low-latency
    /// feedback; that publish failing is logged and swallowed.
    pub async fn execute(&self, command: Command) -> Result<CommandResult, CoreError> {
        route_command(&self.inner, command).await
    }

    // ── State observation ────────────────────────────────────────────

    /// Subscribe to REST health as observed by the poller.
    pub fn api_healthy(&self) -> watch::Receiver<bool> {
        self.inner.api_healthy.subscribe()
    }

    /// Subscribe to direct-channel connection state.
    pub fn direct_state(&self) -> watch::Receiver<ChannelState> {
        self.inner.direct.state()
    }

    /// Subscribe to bridge-channel connection state.
    pub fn bridge_state(&self) -> watch::Receiver<ChannelState> {
        self.inner.bridge.state()
    }

    /// Subscribe to pairing notices from either channel.
    pub fn pairing(&self) -> broadcast::Receiver<Arc<PairingNotice>> {
        self.inner.pairing_tx.subscribe()
    }

    /// Point-in-time connectivity summary.
    pub fn system_health(&self) -> SystemHealth {
        let api = *self.inner.api_healthy.borrow();
        let direct = self.inner.direct.state().borrow().connected;
        let bridge = self.inner.bridge.is_connected();
        SystemHealth {
            api,
            direct,
            bridge,
            overall: api && direct && bridge,
        }
    }

    /// Subscribe the bridge channel to an arbitrary topic pattern.
    ///
    /// For consumers with needs beyond the standard site feeds (e.g.
    /// mmWave frames: `site/{siteId}/coord/{coordId}/mmwave`).
    pub async fn subscribe_topic(
        &self,
        pattern: &str,
    ) -> broadcast::Receiver<Arc<Value>> {
        self.inner.bridge.subscribe(pattern).await
    }

    // ── Stream accessors (delegate to DeviceCache) ───────────────────

    pub fn nodes(&self) -> EntityStream<NodeRecord> {
        EntityStream::new(self.inner.cache.subscribe_nodes())
    }

    pub fn coordinators(&self) -> EntityStream<CoordinatorRecord> {
        EntityStream::new(self.inner.cache.subscribe_coordinators())
    }
}

// ── Background tasks ─────────────────────────────────────────────────

async fn ingest_telemetry(
    cache: Arc<DeviceCache>,
    mut rx: broadcast::Receiver<Arc<Value>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            message = rx.recv() => match message {
                Ok(payload) => cache.ingest_telemetry(&payload),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "telemetry consumer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

async fn ingest_presence(
    cache: Arc<DeviceCache>,
    mut rx: broadcast::Receiver<Arc<Value>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            message = rx.recv() => match message {
                Ok(payload) => match normalize::normalize_presence(&payload) {
                    Some(event) => cache.ingest_presence(event),
                    None => warn!(payload = %payload, "malformed presence payload, dropping"),
                },
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "presence consumer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

async fn ingest_status(
    cache: Arc<DeviceCache>,
    mut rx: broadcast::Receiver<Arc<Value>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            message = rx.recv() => match message {
                Ok(payload) => match normalize::normalize_status(&payload) {
                    Some(change) => cache.ingest_status(&change),
                    None => warn!(payload = %payload, "malformed status payload, dropping"),
                },
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "status consumer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

async fn forward_pairing(
    pairing_tx: broadcast::Sender<Arc<PairingNotice>>,
    mut rx: broadcast::Receiver<Arc<Value>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            message = rx.recv() => match message {
                Ok(payload) => match normalize::normalize_pairing(&payload) {
                    Some(notice) => {
                        let _ = pairing_tx.send(Arc::new(notice));
                    }
                    None => warn!(payload = %payload, "malformed pairing payload, dropping"),
                },
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "pairing consumer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

/// Periodically poll `GET /health` and publish the result.
async fn health_task(hub: DataHub, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(hub.inner.config.health_check_interval);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                let healthy = match hub.inner.rest.health().await {
                    Ok(health) => health.is_healthy(),
                    Err(e) => {
                        debug!(error = %e, "health check failed");
                        false
                    }
                };
                let _ = hub.inner.api_healthy.send(healthy);
            }
        }
    }
}

// ── Command routing ──────────────────────────────────────────────────

/// Route a command: REST first (authoritative), then the optimistic
/// bridge publish for commands with a broker-side equivalent.
async fn route_command(inner: &HubInner, command: Command) -> Result<CommandResult, CoreError> {
    match command {
        // ── Light control (REST + optimistic publish) ────────────────
        Command::SetLight(cmd) => {
            inner.rest.set_light(&cmd).await?;
            publish_node_cmd(
                inner,
                &cmd.site_id,
                &cmd.node_id,
                &json!({
                    "cmd": "set_light",
                    "rgbw": cmd.rgbw,
                    "brightness": cmd.brightness,
                    "fade_ms": cmd.fade_duration.unwrap_or(500),
                }),
            )
            .await;
            Ok(CommandResult::Ok)
        }

        Command::SetColorProfile(cmd) => {
            inner.rest.send_color_profile(&cmd).await?;
            publish_zone_cmd(
                inner,
                &cmd.site_id,
                &cmd.zone_id,
                &json!({
                    "cmd": "color_profile",
                    "profile": cmd.profile,
                    "rgbw": cmd.rgbw,
                }),
            )
            .await;
            Ok(CommandResult::Ok)
        }

        Command::SetNodeColor {
            site_id,
            node_id,
            rgbw,
        } => {
            inner.rest.send_node_color(&site_id, &node_id, rgbw).await?;
            publish_node_cmd(
                inner,
                &site_id,
                &node_id,
                &json!({
                    "cmd": "set_color",
                    "r": rgbw.r,
                    "g": rgbw.g,
                    "b": rgbw.b,
                    "w": rgbw.w,
                }),
            )
            .await;
            Ok(CommandResult::Ok)
        }

        Command::SetNodeBrightness {
            site_id,
            node_id,
            brightness,
        } => {
            inner
                .rest
                .set_node_brightness(&site_id, &node_id, brightness)
                .await?;
            publish_node_cmd(
                inner,
                &site_id,
                &node_id,
                &json!({ "cmd": "set_brightness", "value": brightness }),
            )
            .await;
            Ok(CommandResult::Ok)
        }

        Command::NodeOff { site_id, node_id } => {
            inner.rest.node_off(&site_id, &node_id).await?;
            publish_node_cmd(inner, &site_id, &node_id, &json!({ "cmd": "off" })).await;
            Ok(CommandResult::Ok)
        }

        // ── Device management (REST only) ────────────────────────────
        Command::ApprovePairing(approval) => {
            inner.rest.approve_pairing(&approval).await?;
            Ok(CommandResult::Ok)
        }

        Command::SetNodeZone {
            site_id,
            coordinator_id,
            node_id,
            zone_id,
        } => {
            inner
                .rest
                .set_node_zone(&site_id, &coordinator_id, &node_id, &zone_id)
                .await?;
            Ok(CommandResult::Ok)
        }

        Command::SetNodeName {
            site_id,
            coordinator_id,
            node_id,
            name,
        } => {
            inner
                .rest
                .set_node_name(&site_id, &coordinator_id, &node_id, &name)
                .await?;
            Ok(CommandResult::Ok)
        }

        Command::PairCoordinator {
            site_id,
            coord_id,
            enable,
        } => {
            inner
                .rest
                .pair_coordinator(&site_id, &coord_id, enable)
                .await?;
            Ok(CommandResult::Ok)
        }

        Command::RestartCoordinator { site_id, coord_id } => {
            inner.rest.restart_coordinator(&site_id, &coord_id).await?;
            Ok(CommandResult::Ok)
        }

        Command::SetCoordinatorWifi {
            site_id,
            coord_id,
            ssid,
            password,
        } => {
            inner
                .rest
                .set_coordinator_wifi(&site_id, &coord_id, &ssid, &password)
                .await?;
            Ok(CommandResult::Ok)
        }

        // ── Firmware ─────────────────────────────────────────────────
        Command::StartOta(request) => {
            let job = inner.rest.start_ota(&request).await?;
            Ok(CommandResult::Ota(job))
        }
    }
}

/// Best-effort publish to a node's command topic. Failures are logged
/// and swallowed -- REST already acknowledged the command.
async fn publish_node_cmd(inner: &HubInner, site_id: &str, node_id: &str, payload: &Value) {
    if !inner.bridge.is_connected() {
        return;
    }
    let topic = format!("site/{site_id}/node/{node_id}/cmd");
    if let Err(e) = inner.bridge.publish(&topic, payload, 1).await {
        warn!(error = %e, topic, "optimistic publish failed (REST already succeeded)");
    }
}

/// Best-effort publish to a zone's command topic.
async fn publish_zone_cmd(inner: &HubInner, site_id: &str, zone_id: &str, payload: &Value) {
    if !inner.bridge.is_connected() {
        return;
    }
    let topic = format!("site/{site_id}/zone/{zone_id}/cmd");
    if let Err(e) = inner.bridge.publish(&topic, payload, 1).await {
        warn!(error = %e, topic, "optimistic publish failed (REST already succeeded)");
    }
}
