use anyhow::{bail, Context};
use docchat_core::{ChatRequest, ChatTranscript, EventDecoder, StreamEvent};
use futures::StreamExt;
use std::io::Write;

/// Sends `request` to a running server and prints the answer as words complete.
pub async fn ask<W: Write>(
    server: &str,
    request: &ChatRequest,
    out: &mut W,
) -> anyhow::Result<ChatTranscript> {
    let url = format!("{}/pdf/chat", server.trim_end_matches('/'));
    let response = reqwest::Client::new()
        .post(&url)
        .json(request)
        .send()
        .await
        .with_context(|| format!("could not reach {url}"))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        bail!("server returned {status}: {body}");
    }

    let mut decoder = EventDecoder::new();
    let mut transcript = ChatTranscript::new();
    let mut bytes = response.bytes_stream();

    while let Some(chunk) = bytes.next().await {
        let chunk = chunk.context("answer stream broke")?;
        for event in decoder.push(&chunk)? {
            if let StreamEvent::SourceReference { name, path, .. } = &event {
                writeln!(out, "source: {name} ({path})")?;
            }
            for word in transcript.apply(event) {
                write!(out, "{word}")?;
            }
            out.flush()?;
        }
        if transcript.finished {
            break;
        }
    }

    if !transcript.finished {
        decoder.finish()?;
        for word in transcript.close() {
            write!(out, "{word}")?;
        }
    }
    writeln!(out)?;

    if let Some(message) = &transcript.error {
        bail!("answer failed: {message}");
    }
    Ok(transcript)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::router;
    use crate::server::tests::{test_state, FixedCompletion};

    async fn spawn_server(
        dir: &std::path::Path,
        completion: FixedCompletion,
    ) -> anyhow::Result<String> {
        let app = router(test_state(dir, completion), dir);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(format!("http://{address}"))
    }

    async fn upload(
        server: &str,
        file_name: &'static str,
        text: &'static str,
    ) -> anyhow::Result<String> {
        let form = reqwest::multipart::Form::new().part(
            "file",
            reqwest::multipart::Part::bytes(text.as_bytes()).file_name(file_name),
        );
        let uploaded: serde_json::Value = reqwest::Client::new()
            .post(format!("{server}/pdf/upload"))
            .multipart(form)
            .send()
            .await?
            .json()
            .await?;
        Ok(uploaded[0]["id"].as_str().unwrap_or_default().to_string())
    }

    #[tokio::test]
    async fn ask_prints_sources_then_the_assembled_answer() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let completion = FixedCompletion {
            fragments: vec!["Hel", "lo wor", "ld"],
            fail_after: false,
        };
        let server = spawn_server(dir.path(), completion).await?;
        upload(&server, "greeting.txt", "hello world greeting").await?;

        let request = ChatRequest {
            question: "say hello".to_string(),
            pdf_id: None,
            folder_id: None,
        };
        let mut out = Vec::new();
        let transcript = ask(&server, &request, &mut out).await?;

        assert_eq!(transcript.text(), "Hello world");
        assert_eq!(transcript.sources.len(), 1);
        let printed = String::from_utf8(out)?;
        assert!(printed.starts_with("source: greeting.txt ("), "{printed}");
        assert!(printed.ends_with(")\nHello world\n"), "{printed}");
        Ok(())
    }

    #[tokio::test]
    async fn missing_document_is_reported() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let completion = FixedCompletion {
            fragments: vec![],
            fail_after: false,
        };
        let server = spawn_server(dir.path(), completion).await?;

        let request = ChatRequest {
            question: "q".to_string(),
            pdf_id: Some("missing".to_string()),
            folder_id: None,
        };
        let error = ask(&server, &request, &mut Vec::new()).await.unwrap_err();
        assert!(error.to_string().contains("404"), "{error}");
        Ok(())
    }

    #[tokio::test]
    async fn in_band_errors_fail_the_request() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let completion = FixedCompletion {
            fragments: vec!["partial "],
            fail_after: true,
        };
        let server = spawn_server(dir.path(), completion).await?;

        let id = upload(&server, "notes.txt", "pump notes").await?;

        let request = ChatRequest {
            question: "what?".to_string(),
            pdf_id: Some(id),
            folder_id: None,
        };

        let mut out = Vec::new();
        let error = ask(&server, &request, &mut out).await.unwrap_err();
        assert!(error.to_string().contains("Internal Server Error"));
        assert_eq!(String::from_utf8(out)?, "partial \n");
        Ok(())
    }
}
