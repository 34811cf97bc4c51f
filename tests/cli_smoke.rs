use std::{path::Path, process::Command};

fn campusrag(data_dir: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_campusrag"));
    cmd.arg("--data-dir")
        .arg(data_dir)
        .env_remove("OPENAI_API_KEY")
        .env_remove("CAMPUSRAG_BACKEND")
        .env_remove("CAMPUSRAG_COLLECTION")
        .env_remove("CAMPUSRAG_RERANKER")
        .env("CAMPUSRAG_LOG", "warn");
    cmd
}

#[test]
fn stats_works_without_credentials() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempfile::tempdir()?;
    let output = campusrag(tmp.path()).args(["stats", "--json"]).output()?;
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stats: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(stats["vector_store"]["backend"], "local");
    assert_eq!(stats["vector_store"]["collection_name"], "university_rag");
    assert_eq!(stats["vector_store"]["total_documents"], 0);
    assert_eq!(stats["embedding_model"], "text-embedding-3-small");
    assert_eq!(stats["chunk_size"], 1000);
    assert!(tmp.path().join("vector_db/university_rag.redb").exists());
    Ok(())
}

#[test]
fn collection_flag_selects_store_file() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempfile::tempdir()?;
    let output = campusrag(tmp.path())
        .args(["--collection", "spring", "stats", "--json"])
        .output()?;
    assert!(output.status.success());

    let stats: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(stats["vector_store"]["collection_name"], "spring");
    assert!(tmp.path().join("vector_db/spring.redb").exists());
    Ok(())
}

#[test]
fn stats_ignores_incomplete_reranker_settings() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempfile::tempdir()?;
    let output = campusrag(tmp.path())
        .env("CAMPUSRAG_RERANKER", "http")
        .env_remove("CAMPUSRAG_RERANKER_URL")
        .args(["stats", "--json"])
        .output()?;
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stats: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(stats["vector_store"]["total_documents"], 0);
    Ok(())
}

#[test]
fn query_without_key_fails_cleanly() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempfile::tempdir()?;
    let output = campusrag(tmp.path())
        .args(["query", "Where is the library?"])
        .output()?;
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("OPENAI_API_KEY"));
    Ok(())
}

#[test]
fn clear_on_empty_collection() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempfile::tempdir()?;
    let output = campusrag(tmp.path()).arg("clear").output()?;
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Cleared collection 'university_rag'"));
    Ok(())
}
