use crate::app::CoreAppHandle;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod http;

/// 协议插件的配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// 监听地址
    pub listen_addr: String,
    /// 单个请求的超时时间（秒），包含同步执行的部署流程
    pub request_timeout_secs: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            request_timeout_secs: 600,
        }
    }
}

impl From<&crate::config::ServerConfig> for ProtocolConfig {
    fn from(server: &crate::config::ServerConfig) -> Self {
        Self {
            listen_addr: format!("{}:{}", server.host, server.port),
            request_timeout_secs: server.request_timeout_secs,
        }
    }
}

/// 协议插件 trait
///
/// 对外接口（目前只有 HTTP）都通过这个 trait 接入，
/// 它定义了插件的生命周期和与系统核心的交互方式
#[async_trait]
pub trait ProtocolPlugin: Send + Sync {
    /// 返回协议的唯一名称
    fn name(&self) -> &'static str;

    /// 启动协议服务
    ///
    /// 这是一个长时运行的异步任务，直到 [`ProtocolPlugin::shutdown`] 被调用后返回
    ///
    /// # Arguments
    /// * `core_handle` - 包含了 RolloutService 和审计记录的句柄
    /// * `config` - 此协议实例的配置
    async fn start(&self, core_handle: CoreAppHandle, config: ProtocolConfig) -> anyhow::Result<()>;

    /// 优雅关闭协议服务
    async fn shutdown(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    #[test]
    fn test_protocol_config_default() {
        let config = ProtocolConfig::default();
        assert_eq!(config.listen_addr, "127.0.0.1:8080");
        assert_eq!(config.request_timeout_secs, 600);
    }

    #[test]
    fn test_protocol_config_from_server_section() {
        let server = ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 9090,
            request_timeout_secs: 900,
        };
        let config = ProtocolConfig::from(&server);
        assert_eq!(config.listen_addr, "0.0.0.0:9090");
        assert_eq!(config.request_timeout_secs, 900);
    }
}
