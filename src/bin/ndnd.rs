//! ndnd - NDN 포워더 face 데몬
//!
//! 리스너를 열고 들어온 패킷을 포워딩 스레드 큐로 분배한다.
//! 포워딩 스레드는 받은 패킷을 기록만 한다.
//!
//! 사용법:
//!   cargo run --release --bin ndnd -- [OPTIONS]
//!
//! 예시:
//!   # 기본 포트
//!   cargo run --release --bin ndnd
//!
//!   # 설정 파일 + 디버그 로그
//!   cargo run --release --bin ndnd -- --config ndnd.toml --log-level debug

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use crossbeam_channel::select;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use ndnd::dispatch::FwQueues;
use ndnd::face::listener::{TcpListener, UdpListener, WebSocketListener};
use ndnd::{Config, FaceSystem};

/// 데몬 인자
struct DaemonArgs {
    config_path: Option<PathBuf>,
    udp_port: Option<u16>,
    tcp_port: Option<u16>,
    unix_path: Option<PathBuf>,
    ws_port: Option<u16>,
    threads: Option<usize>,
    low_spec: bool,
    log_level: String,
}

impl Default for DaemonArgs {
    fn default() -> Self {
        Self {
            config_path: None,
            udp_port: None,
            tcp_port: None,
            unix_path: None,
            ws_port: None,
            threads: None,
            low_spec: false,
            log_level: "info".to_string(),
        }
    }
}

const HELP: &str = r#"ndnd - NDN 포워더 face 데몬

UDP/TCP/Unix/WebSocket 리스너를 열고 NDNLPv2 face를 만든다.

사용법:
  cargo run --release --bin ndnd -- [OPTIONS]

옵션:
  -c, --config <PATH>     TOML 설정 파일
  --udp-port <PORT>       UDP 유니캐스트 포트 (기본: 6363)
  --tcp-port <PORT>       TCP 포트 (기본: 6363)
  --unix <PATH>           Unix 소켓 경로 (기본: /run/nfd.sock)
  --ws-port <PORT>        WebSocket 포트 (기본: 9696, 0이면 끔)
  -t, --threads <N>       포워딩 스레드 수 (기본: 8)
  --low-spec              저사양 기기용 기본값 (스레드 2, 큐 256)
  --log-level <LEVEL>     로그 레벨 (기본: info, RUST_LOG가 우선)
  -h, --help              이 도움말 출력

예시:
  # 설정 파일 사용
  cargo run --release --bin ndnd -- --config ndnd.toml

  # 포트 변경
  cargo run --release --bin ndnd -- --udp-port 16363 --tcp-port 16363
"#;

fn parse_value<T: std::str::FromStr>(args: &[String], i: usize, flag: &str) -> Result<T, String> {
    let raw = args
        .get(i + 1)
        .ok_or_else(|| format!("{flag}: 값이 필요합니다"))?;
    raw.parse()
        .map_err(|_| format!("{flag}: 유효하지 않은 값 '{raw}'"))
}

fn parse_args() -> Result<DaemonArgs, String> {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = DaemonArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                parsed.config_path = Some(parse_value(&args, i, "--config")?);
                i += 1;
            }
            "--udp-port" => {
                parsed.udp_port = Some(parse_value(&args, i, "--udp-port")?);
                i += 1;
            }
            "--tcp-port" => {
                parsed.tcp_port = Some(parse_value(&args, i, "--tcp-port")?);
                i += 1;
            }
            "--unix" => {
                parsed.unix_path = Some(parse_value(&args, i, "--unix")?);
                i += 1;
            }
            "--ws-port" => {
                parsed.ws_port = Some(parse_value(&args, i, "--ws-port")?);
                i += 1;
            }
            "--threads" | "-t" => {
                parsed.threads = Some(parse_value(&args, i, "--threads")?);
                i += 1;
            }
            "--low-spec" => parsed.low_spec = true,
            "--log-level" => {
                parsed.log_level = parse_value(&args, i, "--log-level")?;
                i += 1;
            }
            "--help" | "-h" => {
                println!("{HELP}");
                std::process::exit(0);
            }
            other => return Err(format!("알 수 없는 옵션: {other}")),
        }
        i += 1;
    }

    Ok(parsed)
}

/// 설정 파일 + 명령행 덮어쓰기
fn load_config(args: &DaemonArgs) -> ndnd::Result<Config> {
    let mut config = match &args.config_path {
        Some(path) => Config::from_file(path)?,
        None if args.low_spec => Config::low_spec(),
        None => Config::default(),
    };
    if let Some(port) = args.udp_port {
        config.udp_unicast_port = port;
    }
    if let Some(port) = args.tcp_port {
        config.tcp_unicast_port = port;
    }
    if let Some(path) = &args.unix_path {
        config.unix_socket_path = path.clone();
    }
    if let Some(port) = args.ws_port {
        config.websocket_port = port;
    }
    if let Some(n) = args.threads {
        config.num_fw_threads = n;
    }
    Ok(config)
}

/// 포워딩 스레드 자리 (받은 패킷 기록)
fn spawn_fw_thread(queues: FwQueues) -> std::io::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name(format!("fw-{}", queues.thread))
        .spawn(move || loop {
            select! {
                recv(queues.interests) -> pkt => match pkt {
                    Ok(pkt) => debug!(
                        "fw-{} - Interest {} (face={:?})",
                        queues.thread,
                        pkt.packet.name(),
                        pkt.incoming_face_id
                    ),
                    Err(_) => return,
                },
                recv(queues.data) -> pkt => match pkt {
                    Ok(pkt) => debug!(
                        "fw-{} - Data {} (face={:?})",
                        queues.thread,
                        pkt.packet.name(),
                        pkt.incoming_face_id
                    ),
                    Err(_) => return,
                },
            }
        })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = match parse_args() {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("{msg}\n\n{HELP}");
            std::process::exit(2);
        }
    };

    // 로깅 설정
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.as_str()));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(&args)?;
    info!("ndnd 시작");
    info!("포워딩 스레드: {}", config.num_fw_threads);
    info!("Face 큐 크기: {}", config.queue_size);

    let (system, queues) = FaceSystem::new(config.clone());
    for q in queues {
        spawn_fw_thread(q)?;
    }

    // ─────────────────────────────────────────────────────────────────
    // 리스너
    // ─────────────────────────────────────────────────────────────────
    let any = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

    let udp = UdpListener::bind(system.clone(), SocketAddr::new(any, config.udp_unicast_port))?;
    udp.start();

    let tcp =
        TcpListener::bind(system.clone(), SocketAddr::new(any, config.tcp_unicast_port)).await?;
    tcp.start();

    let ws = if config.websocket_port != 0 {
        let ws =
            WebSocketListener::bind(system.clone(), SocketAddr::new(any, config.websocket_port))
                .await?;
        ws.start();
        Some(ws)
    } else {
        None
    };

    #[cfg(unix)]
    let unix = match ndnd::face::listener::UnixListener::bind(
        system.clone(),
        &config.unix_socket_path,
    ) {
        Ok(l) => {
            l.start();
            Some(l)
        }
        Err(e) => {
            warn!(
                "Unix 리스너 시작 실패 ({}): {}",
                config.unix_socket_path.display(),
                e
            );
            None
        }
    };

    info!("준비 완료. Ctrl-C로 종료");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("시그널 대기 실패: {}", e);
    }

    // ─────────────────────────────────────────────────────────────────
    // 종료
    // ─────────────────────────────────────────────────────────────────
    info!("종료 중...");
    udp.stop().await;
    tcp.stop().await;
    if let Some(ws) = ws {
        ws.stop().await;
    }
    #[cfg(unix)]
    if let Some(unix) = unix {
        unix.stop().await;
    }
    system.close_all();
    info!("ndnd 종료");

    Ok(())
}
