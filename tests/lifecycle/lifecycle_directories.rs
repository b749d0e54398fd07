//! Directory probing and catalog tests through the manager.

use std::sync::Arc;

use larder::{Error, ManagerConfig, ModelFileType, ModelLoader, ModelManager};

use crate::fixture::{fixture, write_file, MockLoader};

/// `./models` with `a.gguf` (100 B), `b.gguf` (200 B) and `notes.txt`.
#[tokio::test]
async fn test_scan_lists_only_model_files() {
    let root = tempfile::tempdir().unwrap();
    let models = root.path().join("models");
    std::fs::create_dir(&models).unwrap();
    write_file(&models, "a.gguf", 100);
    write_file(&models, "b.gguf", 200);
    write_file(&models, "notes.txt", 5);

    let loader: Arc<dyn ModelLoader> = Arc::new(MockLoader::new());
    let manager = ModelManager::new(ManagerConfig::with_directories([&models]), loader).unwrap();

    let files = manager.model_files().await;
    assert_eq!(files.len(), 2);

    let mut sizes: Vec<u64> = files.iter().map(|f| f.size_bytes).collect();
    sizes.sort();
    assert_eq!(sizes, vec![100, 200]);
    assert!(files.iter().all(|f| f.file_type == ModelFileType::Gguf));
    assert!(files.iter().all(|f| f.file_name != "notes.txt"));
}

#[tokio::test]
async fn test_configured_directory_is_listed() {
    let fx = fixture();
    let dirs = fx.manager.directories().await;
    assert_eq!(dirs, vec![fx.models_dir.clone()]);
}

#[tokio::test]
async fn test_add_directory_does_not_duplicate() {
    let fx = fixture();

    for _ in 0..10 {
        assert!(!fx.manager.add_directory(&fx.models_dir).await.unwrap());
        assert_eq!(fx.manager.directories().await.len(), 1);
    }

    let dotted = fx.models_dir.join("..").join("models").join(".");
    assert!(!fx.manager.add_directory(&dotted).await.unwrap());
    assert_eq!(fx.manager.directories().await.len(), 1);
    assert_eq!(fx.manager.model_files().await.len(), 3);
}

#[tokio::test]
async fn test_add_missing_directory() {
    let fx = fixture();
    let missing = fx.models_dir.join("nope");

    let err = fx.manager.add_directory(&missing).await.unwrap_err();
    assert!(matches!(err, Error::DirectoryNotFound(_)));
    assert_eq!(fx.manager.directories().await.len(), 1);
}

#[tokio::test]
async fn test_bad_configured_directory_is_skipped() {
    let root = tempfile::tempdir().unwrap();
    let good = root.path().join("good");
    std::fs::create_dir(&good).unwrap();
    write_file(&good, "a.gguf", 1);
    let missing = root.path().join("missing");

    let loader: Arc<dyn ModelLoader> = Arc::new(MockLoader::new());
    let manager =
        ModelManager::new(ManagerConfig::with_directories([&missing, &good]), loader).unwrap();

    assert_eq!(manager.directories().await.len(), 1);
    assert_eq!(manager.model_files().await.len(), 1);
}

#[tokio::test]
async fn test_add_directories_counts_new_entries() {
    let fx = fixture();
    let extra = fx.models_dir.parent().unwrap().join("extra");
    std::fs::create_dir(&extra).unwrap();
    write_file(&extra, "d.gguf", 400);
    let missing = fx.models_dir.join("missing");

    let added = fx
        .manager
        .add_directories([&fx.models_dir, &missing, &extra])
        .await;
    assert_eq!(added, 1);
    assert_eq!(fx.manager.model_files().await.len(), 4);

    let entries = fx.manager.directory_entries().await;
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].file_count, 3);
    assert_eq!(entries[1].file_count, 1);
}

#[tokio::test]
async fn test_remove_and_clear_directories() {
    let fx = fixture();
    let extra = fx.models_dir.parent().unwrap().join("extra");
    std::fs::create_dir(&extra).unwrap();
    write_file(&extra, "d.gguf", 400);
    fx.manager.add_directory(&extra).await.unwrap();

    assert!(fx.manager.remove_directory(&fx.models_dir).await);
    assert!(!fx.manager.remove_directory(&fx.models_dir).await);
    let names: Vec<_> = fx
        .manager
        .model_files()
        .await
        .into_iter()
        .map(|f| f.file_name)
        .collect();
    assert_eq!(names, vec!["d.gguf"]);

    fx.manager.clear_directories().await;
    assert!(fx.manager.directories().await.is_empty());
    assert!(fx.manager.model_files().await.is_empty());
}

#[tokio::test]
async fn test_find_model_file_and_rescan() {
    let fx = fixture();

    let record = fx.manager.find_model_file(fx.model("b.gguf")).await.unwrap();
    assert_eq!(record.size_bytes, 200);
    assert_eq!(record.path, fx.model("b.gguf"));
    assert!(fx.manager.find_model_file(fx.model("notes.txt")).await.is_none());

    write_file(&fx.models_dir, "d.gguf", 400);
    assert!(fx.manager.find_model_file(fx.model("d.gguf")).await.is_none());

    assert_eq!(fx.manager.rescan_directory(&fx.models_dir).await.unwrap(), 4);
    assert!(fx.manager.find_model_file(fx.model("d.gguf")).await.is_some());
}

#[tokio::test]
async fn test_custom_extensions() {
    let root = tempfile::tempdir().unwrap();
    write_file(root.path(), "a.gguf", 1);
    write_file(root.path(), "b.bin", 2);
    write_file(root.path(), "c.txt", 3);

    let config = ManagerConfig {
        directories: vec![root.path().to_path_buf()],
        extensions: vec!["gguf".into(), ".BIN".into()],
        ..Default::default()
    };
    let loader: Arc<dyn ModelLoader> = Arc::new(MockLoader::new());
    let manager = ModelManager::new(config, loader).unwrap();

    let files = manager.model_files().await;
    assert_eq!(files.len(), 2);
    assert_eq!(files[1].file_type, ModelFileType::Other("bin".into()));
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = ManagerConfig {
        extensions: Vec::new(),
        ..Default::default()
    };
    let loader: Arc<dyn ModelLoader> = Arc::new(MockLoader::new());
    let err = ModelManager::new(config, loader).unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
}

#[cfg(unix)]
#[tokio::test]
async fn test_symlinked_model_keeps_its_listed_path() {
    let fx = fixture();
    let elsewhere = tempfile::tempdir().unwrap();
    let target = write_file(elsewhere.path(), "real.gguf", 50);
    std::os::unix::fs::symlink(&target, fx.model("linked.gguf")).unwrap();
    fx.manager.rescan_directory(&fx.models_dir).await.unwrap();

    let record = fx.manager.find_model_file(fx.model("linked.gguf")).await.unwrap();
    assert_eq!(record.size_bytes, 50);
    let by_own_path = fx.manager.find_model_file(&record.path).await.unwrap();
    assert_eq!(by_own_path, record);

    let model = fx.manager.load_path(&record.path).await.unwrap();
    assert_eq!(model.model_id(), "llama-linked");
    assert_eq!(model.path(), record.path);
    assert_eq!(fx.loader.last_params().unwrap().model_path, record.path);
}
