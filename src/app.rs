use crate::audit::MemoryAuditSink;
use crate::rollout::RolloutService;
use std::sync::Arc;

/// 核心应用句柄，封装了所有核心服务的引用
/// 这个结构体是协议层与核心业务逻辑之间的桥梁
#[derive(Clone)]
pub struct CoreAppHandle {
    /// 发布服务，负责版本创建、应用、回滚和健康检查
    pub service: Arc<RolloutService>,

    /// 最近的审计记录，供状态查询使用
    pub audit: Arc<MemoryAuditSink>,
}

impl CoreAppHandle {
    /// 创建新的核心应用句柄
    pub fn new(service: Arc<RolloutService>, audit: Arc<MemoryAuditSink>) -> Self {
        Self { service, audit }
    }

    /// 获取发布服务的引用
    pub fn service(&self) -> &RolloutService {
        &self.service
    }

    /// 获取审计记录的引用
    pub fn audit(&self) -> &MemoryAuditSink {
        &self.audit
    }
}
