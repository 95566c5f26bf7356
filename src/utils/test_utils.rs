use crate::core::config::data::McpServerConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// Line-oriented MCP server used by process-level tests.
///
/// Request ids are recovered with `sed`, which relies on requests being
/// serialized as `{"jsonrpc":"2.0","id":N,...}`. Every line received is
/// appended to `$1/received`; replies to server-initiated requests also go
/// to `$1/replies`.
pub const MOCK_MCP_SERVER: &str = r#"#!/bin/sh
log_dir="$1"
while IFS= read -r line; do
  printf '%s\n' "$line" >> "$log_dir/received"
  id=$(printf '%s\n' "$line" | sed -n 's/^{"jsonrpc":"2.0","id":\([0-9]*\),.*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf 'this is not json\n'
      printf '{"jsonrpc":"2.0"}\n'
      printf '{"jsonrpc":"2.0","method":"notifications/message","params":{"level":"info","data":"booting"}}\n'
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2025-11-25","capabilities":{"tools":{}},"serverInfo":{"name":"mock","version":"0.1.0"}}}\n' "$id"
      ;;
    *'"method":"tools/list"'*'"cursor":"page2"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"fail","description":"Always fails","inputSchema":{"type":"object"}}]}}\n' "$id"
      ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"echo","description":"Echo text","inputSchema":{"type":"object","properties":{"text":{"type":"string","description":"Text to echo"},"count":{"type":"integer"},"loud":{"type":"boolean"},"tags":{"type":"array","items":{"type":"string"}},"extra":{}},"required":["text"]}}],"nextCursor":"page2"}}\n' "$id"
      ;;
    *'"method":"tools/call"'*'"name":"fail"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"isError":true,"content":[{"type":"text","text":"boom"}]}}\n' "$id"
      ;;
    *'"method":"tools/call"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"ok"}]}}\n' "$id"
      ;;
    *'"method":"echo"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"id":%s}}\n' "$id" "$id"
      ;;
    *'"method":"fast"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"which":"fast"}}\n' "$id"
      ;;
    *'"method":"slow"'*)
      ( sleep 1; printf '{"jsonrpc":"2.0","id":%s,"result":{"which":"slow"}}\n' "$id" ) &
      ;;
    *'"method":"fails"'*)
      printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32000,"message":"nope"}}\n' "$id"
      ;;
    *'"method":"trigger_requests"'*)
      printf '{"jsonrpc":"2.0","id":"srv-1","method":"ping"}\n'
      printf '{"jsonrpc":"2.0","id":"srv-2","method":"sampling/createMessage","params":{}}\n'
      printf '{"jsonrpc":"2.0","method":"notifications/tools/list_changed"}\n'
      printf '{"jsonrpc":"2.0","id":%s,"result":{}}\n' "$id"
      ;;
    *'"id":"srv-'*)
      printf '%s\n' "$line" >> "$log_dir/replies"
      ;;
    *'"method":"quit"'*)
      exit 0
      ;;
  esac
done
"#;

/// A server whose first `tools/list` page yields `first_page` and whose
/// every cursor-bearing request yields `later_pages`. Both are raw JSON
/// `result` objects.
pub fn paging_server(first_page: &str, later_pages: &str) -> String {
    format!(
        r#"#!/bin/sh
log_dir="$1"
while IFS= read -r line; do
  printf '%s\n' "$line" >> "$log_dir/received"
  id=$(printf '%s\n' "$line" | sed -n 's/^{{"jsonrpc":"2.0","id":\([0-9]*\),.*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{{"jsonrpc":"2.0","id":%s,"result":{{"protocolVersion":"2025-11-25","capabilities":{{}},"serverInfo":{{"name":"pager","version":"0.1.0"}}}}}}\n' "$id"
      ;;
    *'"method":"tools/list"'*'"cursor"'*)
      printf '{{"jsonrpc":"2.0","id":%s,"result":{later_pages}}}\n' "$id"
      ;;
    *'"method":"tools/list"'*)
      printf '{{"jsonrpc":"2.0","id":%s,"result":{first_page}}}\n' "$id"
      ;;
  esac
done
"#
    )
}

/// A script on disk plus the config that launches it through `sh`.
pub struct MockServer {
    pub dir: TempDir,
    pub config: McpServerConfig,
}

impl MockServer {
    pub fn new(name: &str) -> Self {
        Self::with_script(name, MOCK_MCP_SERVER)
    }

    pub fn with_script(name: &str, script: &str) -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let script_path = dir.path().join("server.sh");
        std::fs::write(&script_path, script).expect("Failed to write mock server");

        let mut config = McpServerConfig::new(name, "sh");
        config.args = vec![
            script_path.display().to_string(),
            dir.path().display().to_string(),
        ];
        Self { dir, config }
    }

    /// Received lines that carry `method`.
    pub fn received_method(&self, method: &str) -> Vec<String> {
        let needle = format!("\"method\":\"{method}\"");
        self.received()
            .into_iter()
            .filter(|line| line.contains(&needle))
            .collect()
    }

    pub fn replies_path(&self) -> PathBuf {
        self.dir.path().join("replies")
    }

    /// Lines the server has read from stdin so far.
    pub fn received(&self) -> Vec<String> {
        std::fs::read_to_string(self.dir.path().join("received"))
            .map(|contents| contents.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }
}

/// Polls `path` until it holds at least `lines` lines.
pub async fn wait_for_lines(path: &Path, lines: usize) -> Vec<String> {
    for _ in 0..200 {
        if let Ok(contents) = std::fs::read_to_string(path) {
            let found: Vec<String> = contents.lines().map(str::to_string).collect();
            if found.len() >= lines {
                return found;
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {lines} lines in {}", path.display());
}
