//! # 代理转发模块
//!
//! 爬虫请求的完整处理流水线：
//!
//! 1. 自请求检测（目标解析到本机地址时直接返回空的 200）
//! 2. 登记响应顺序槽位
//! 3. 缓存查找（仅 GET）
//! 4. robots.txt 检查（拒绝时返回 403）
//! 5. 抓取间隔检查（拒绝时返回 429 与 `Retry-After`）
//! 6. 转发到上游并写入缓存
//! 7. 释放顺序槽位后返回响应
//!
//! - `http_client`: 上游传输抽象与 hyper 实现
//! - `loop_guard`: 自请求检测
//! - `pipeline`: 请求处理流水线
//! - `responses`: 403/429 等固定响应
//! - `server`: HTTP 监听服务

pub mod http_client;
pub mod loop_guard;
pub mod pipeline;
pub mod responses;
pub mod server;

pub use http_client::{HyperTransport, SharedTransport, Transport};
pub use loop_guard::{HostResolver, SelfRequestGuard, StaticResolver, TokioResolver};
pub use pipeline::ProxyPipeline;
pub use server::ProxyServer;
