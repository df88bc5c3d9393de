//! Asynchronous loading paths: bytes, pending downloads, URL fetch.

use tether_bridge::{init, BridgeConfig, BridgeError, ModuleSource};

const TRIVIAL_WAT: &str = r#"
    (module
        (memory (export "memory") 1)
        (func (export "main") (param i32 i32) (result i32)
            i32.const 11)
    )
"#;

#[tokio::test]
async fn test_init_from_bytes() {
    let mut inst = init(
        ModuleSource::Bytes(TRIVIAL_WAT.as_bytes().to_vec()),
        BridgeConfig::default(),
    )
    .await
    .unwrap();
    assert_eq!(inst.call_main(0, 0).unwrap(), 11);
}

#[tokio::test]
async fn test_init_from_pending_download() {
    let source = ModuleSource::pending(async { Ok(TRIVIAL_WAT.as_bytes().to_vec()) });
    let mut inst = init(source, BridgeConfig::default()).await.unwrap();
    assert_eq!(inst.call_main(0, 0).unwrap(), 11);
}

#[tokio::test]
async fn test_failed_pending_download_is_fetch_error() {
    let source = ModuleSource::pending(async {
        Err(anyhow::anyhow!("download aborted"))
    });
    let err = init(source, BridgeConfig::default()).await.unwrap_err();
    match err {
        BridgeError::Fetch(msg) => assert!(msg.contains("download aborted"), "got: {}", msg),
        other => panic!("expected fetch error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unreachable_url_is_fetch_error() {
    // Port 1 on loopback refuses immediately; no instance is produced.
    let err = init(
        ModuleSource::Url("http://127.0.0.1:1/module.wasm".into()),
        BridgeConfig::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, BridgeError::Fetch(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_pending_bytes_still_validated() {
    let source = ModuleSource::pending(async { Ok(b"garbage".to_vec()) });
    let err = init(source, BridgeConfig::default()).await.unwrap_err();
    assert!(matches!(err, BridgeError::Instantiation(_)), "got {:?}", err);
}
