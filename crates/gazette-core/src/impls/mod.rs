//! Impls - ports の実装（開発用・テスト用）
//!
//! # 含まれる実装
//! - **InMemoryJobStore**: 単一プロセス用の JobStore
//! - **InMemoryOwnerDirectory**: 開発用の所有者ディレクトリ
//! - **FsContentStore**: ローカルファイルシステムの artifact 読み込み
//!
//! 永続 DB を使う JobStore は別クレートで `ports::JobStore` を実装する想定。

pub mod fs_content_store;
pub mod inmem_job_store;
pub mod inmem_owner_directory;

pub use self::fs_content_store::FsContentStore;
pub use self::inmem_job_store::InMemoryJobStore;
pub use self::inmem_owner_directory::InMemoryOwnerDirectory;
