//! Worker daemon protocol.
//!
//! The daemon installed on each host is driven through short command-line
//! flags and answers with JSON on stdout:
//!
//! | Flag | Meaning | Output |
//! |------|---------|--------|
//! | `-r` | report status | `{"status": 60, "hashRate": 41.7}` or nothing |
//! | `-l` | list devices | `[{"deviceId": .., "displayName": .., "deviceVersion": .., "driverVersion": ..}]` |
//! | `-c <json>` | configure | `{"instanceId": 1}` |
//! | `-s <verb>` | service control | `{"ok": true}` |

use serde::{Deserialize, Serialize};
use strum::Display;

use crate::error::{ExecutionError, ExecutionFailure};
use crate::executor::{self, RemoteExecutor, paths};
use crate::types::{DeviceRef, HashRate, MachineName, ServiceStatus};
use crate::wallet::CoinConfig;

/// Directory the package is unpacked into, under the deployment folder.
pub const MINER_BINARY_DIR: &str = "XDaggerMinerWin";

/// Daemon executable inside [`MINER_BINARY_DIR`].
pub const DAEMON_EXECUTABLE: &str = "XDaggerMinerDaemon.exe";

/// Services installed by the daemon are named with this prefix.
pub const SERVICE_NAME_PREFIX: &str = "XDaggerMiner";

/// Answer to `-r`.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportOutput {
    pub status: i32,
    #[serde(default)]
    pub hash_rate: HashRate,
}

impl ReportOutput {
    pub fn service_status(&self) -> ServiceStatus {
        ServiceStatus::from_code(self.status)
    }
}

/// One entry of the `-l` answer.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceOutput {
    pub device_id: String,
    pub display_name: String,
    #[serde(default)]
    pub device_version: String,
    #[serde(default)]
    pub driver_version: String,
}

impl From<DeviceOutput> for DeviceRef {
    fn from(out: DeviceOutput) -> Self {
        DeviceRef {
            device_id: out.device_id,
            display_name: out.display_name,
            hardware_version: out.device_version,
            driver_version: out.driver_version,
        }
    }
}

/// Payload of `-c`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConfigureRequest {
    pub device_id: String,
    #[serde(rename = "XDaggerWallet", skip_serializing_if = "Option::is_none")]
    pub xdagger_wallet: Option<String>,
    #[serde(rename = "XDaggerPoolAddress", skip_serializing_if = "Option::is_none")]
    pub xdagger_pool_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eth_pool_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    /// Ask the daemon to pick a free instance id.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub auto_decide_instance_id: bool,
}

impl ConfigureRequest {
    /// Request for `coin` on `device_id`.
    ///
    /// XDagger instances get their id from the daemon; Ethereum instances
    /// reuse an already assigned one.
    pub fn for_coin(device_id: &str, coin: &CoinConfig, instance: Option<&str>) -> Self {
        let mut request = Self {
            device_id: device_id.to_string(),
            xdagger_wallet: None,
            xdagger_pool_address: None,
            eth_pool_address: None,
            instance_id: None,
            auto_decide_instance_id: false,
        };

        match coin {
            CoinConfig::XDagger { wallet, pool } => {
                request.xdagger_wallet = Some(wallet.clone());
                request.xdagger_pool_address = Some(pool.clone());
                request.auto_decide_instance_id = instance.is_none();
                request.instance_id = instance.map(str::to_string);
            }
            CoinConfig::Ethereum { .. } => {
                request.eth_pool_address = Some(coin.pool_address());
                request.instance_id = instance.map(str::to_string);
            }
        }

        request
    }
}

/// Answer to `-c`.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigureOutput {
    #[serde(default)]
    pub instance_id: Option<i64>,
    #[serde(default)]
    pub ok: Option<bool>,
}

/// Answer to `-s`.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct OkOutput {
    pub ok: bool,
}

/// Service control verbs accepted by `-s`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ServiceVerb {
    Install,
    Start,
    Stop,
    Uninstall,
}

/// Host-local path of the binary directory under `deployment_folder`.
pub fn binary_dir(deployment_folder: &str) -> String {
    paths::join(deployment_folder, MINER_BINARY_DIR)
}

/// Host-local path of the daemon under `deployment_folder`.
pub fn daemon_path(deployment_folder: &str) -> String {
    paths::join(&binary_dir(deployment_folder), DAEMON_EXECUTABLE)
}

/// Typed access to the daemon of one deployment.
pub struct WorkerClient<'a> {
    executor: &'a dyn RemoteExecutor,
    host: &'a MachineName,
    daemon: String,
}

impl<'a> WorkerClient<'a> {
    pub fn new(executor: &'a dyn RemoteExecutor, host: &'a MachineName, deployment_folder: &str) -> Self {
        Self {
            executor,
            host,
            daemon: daemon_path(deployment_folder),
        }
    }

    async fn call<T: serde::de::DeserializeOwned>(&self, args: Vec<String>) -> Result<T, ExecutionError> {
        executor::execute(self.executor, self.host, &self.daemon, &args).await
    }

    /// `-r`. `None` when the daemon answered with nothing.
    pub async fn report(&self) -> Result<Option<ReportOutput>, ExecutionError> {
        self.call(vec!["-r".into()]).await
    }

    /// `-l`.
    pub async fn list_devices(&self) -> Result<Vec<DeviceRef>, ExecutionError> {
        let devices: Vec<DeviceOutput> = self.call(vec!["-l".into()]).await?;
        Ok(devices.into_iter().map(DeviceRef::from).collect())
    }

    /// `-c <json>`.
    pub async fn configure(&self, request: &ConfigureRequest) -> Result<ConfigureOutput, ExecutionError> {
        let json = serde_json::to_string(request).map_err(|e| {
            ExecutionError::new(self.host.as_str(), "-c", ExecutionFailure::MalformedOutput(e.to_string()))
        })?;
        let output: ConfigureOutput = self.call(vec!["-c".into(), json.clone()]).await?;
        if output.ok == Some(false) {
            return Err(self.rejected(&format!("-c {json}")));
        }
        Ok(output)
    }

    /// `-s <verb>`. A `{"ok": false}` answer is an error.
    pub async fn service(&self, verb: ServiceVerb) -> Result<(), ExecutionError> {
        let output: OkOutput = self.call(vec!["-s".into(), verb.to_string()]).await?;
        if output.ok {
            Ok(())
        } else {
            Err(self.rejected(&format!("-s {verb}")))
        }
    }

    fn rejected(&self, args: &str) -> ExecutionError {
        ExecutionError::new(
            self.host.as_str(),
            format!("{} {}", self.daemon, args),
            ExecutionFailure::Rejected,
        )
    }
}
