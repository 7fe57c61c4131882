// 兼容层错误码，0 表示成功
#[repr(i32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Errno {
    Ok = 0,                  // 成功
    DetectionAmbiguous = 1,  // 探测信号均未命中，使用默认分类
    BackingUnavailable = 2,  // 配置存储后端无法构建
    CapabilityDenied = 3,    // 当前环境缺少所需能力
    HookInstallFailure = 4,  // hook 安装失败或回调执行失败
    ServiceUnreachable = 5,  // 桥接服务不可达
    InvalidArg = 11,         // 参数无效
    NotFound = 12,           // 目标未找到
    ReadOnly = 13,           // 只读后端拒绝写入
    Reentrant = 14,          // 在拦截回调中调用 API，拒绝执行
    Callback = 15,           // 拦截回调返回错误或 panic
    Timeout = 16,            // 等待超时
    Io = 17,                 // 文件或套接字 IO 失败
    Format = 18,             // 数据格式错误
    Unknown = 1001,          // 未知错误
}

impl Errno {
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::DetectionAmbiguous => "detection-ambiguous",
            Self::BackingUnavailable => "backing-unavailable",
            Self::CapabilityDenied => "capability-denied",
            Self::HookInstallFailure => "hook-install-failure",
            Self::ServiceUnreachable => "service-unreachable",
            Self::InvalidArg => "invalid-arg",
            Self::NotFound => "not-found",
            Self::ReadOnly => "read-only",
            Self::Reentrant => "reentrant",
            Self::Callback => "callback",
            Self::Timeout => "timeout",
            Self::Io => "io",
            Self::Format => "format",
            Self::Unknown => "unknown",
        }
    }
}

impl From<Errno> for i32 {
    fn from(value: Errno) -> Self {
        value as i32
    }
}

#[cfg(test)]
mod tests {
    use super::Errno;

    #[test]
    fn ok_is_zero() {
        assert_eq!(Errno::Ok.as_i32(), 0);
        assert!(Errno::Ok.is_ok());
        assert!(!Errno::CapabilityDenied.is_ok());
        assert_eq!(i32::from(Errno::Unknown), 1001);
    }
}
