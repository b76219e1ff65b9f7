//! 对外公布的访问地址

use std::net::{IpAddr, UdpSocket};

/// 探测本机在局域网中的地址
///
/// UDP `connect` 不会发出任何数据包，只让系统选择出口网卡。
/// 没有可用网络时返回 `None`。
pub fn local_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_unspecified()).then_some(ip)
}

/// 拼出 `http://<host>:<port>`
///
/// 监听在具体地址上时直接使用该地址，监听在通配地址上时使用探测到的局域网地址，
/// 都不可用时退回 `localhost`。
pub fn base_url(bind: IpAddr, port: u16) -> String {
    let host = if bind.is_unspecified() {
        local_ip().map_or_else(|| "localhost".to_string(), format_host)
    } else {
        format_host(bind)
    };
    format!("http://{host}:{port}")
}

fn format_host(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => format!("[{v6}]"),
    }
}
