use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{debug, info};
use ndarray::{Array1, Array2};
use ndarray_npy::read_npy;
use walkdir::WalkDir;

use crate::cli::{SubCommandExtend, open_db};
use crate::config::Opts;
use crate::db::crud;
use crate::job::UNKNOWN_LABEL;
use crate::utils::{suffix_regex, vector_to_bytes};

#[derive(Parser, Debug, Clone)]
pub struct AddCommand {
    /// 猫咪名字
    pub name: String,
    /// 参考特征向量文件或目录，目录会被递归扫描
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
    /// 特征文件的后缀名，用逗号分隔
    #[arg(long, default_value = "npy")]
    pub suffix: String,
}

/// 读取一个 npy 文件，一维为单个向量，二维为每行一个向量
fn read_vectors(path: &Path) -> Result<Vec<Vec<f32>>> {
    if let Ok(matrix) = read_npy::<_, Array2<f32>>(path) {
        return Ok(matrix.rows().into_iter().map(|row| row.to_vec()).collect());
    }
    let vector: Array1<f32> =
        read_npy(path).with_context(|| format!("无法读取特征文件 {}", path.display()))?;
    Ok(vec![vector.to_vec()])
}

/// 检查猫咪名字，不能为空，也不能与未匹配时的占位名字相同
fn check_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() {
        bail!("猫咪名字不能为空");
    }
    if name == UNKNOWN_LABEL {
        bail!("{UNKNOWN_LABEL} 是保留名字，不能用作猫咪名字");
    }
    Ok(name)
}

impl AddCommand {
    fn collect_files(&self) -> Result<Vec<PathBuf>> {
        let re_suf = suffix_regex(&self.suffix)?;
        let mut files = vec![];
        for path in &self.paths {
            if path.is_file() {
                files.push(path.clone());
                continue;
            }
            for entry in WalkDir::new(path).sort_by_file_name() {
                let entry = entry?;
                let matched = entry
                    .path()
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| re_suf.is_match(ext));
                if entry.file_type().is_file() && matched {
                    files.push(entry.into_path());
                }
            }
        }
        Ok(files)
    }

    fn load_vectors(&self) -> Result<Vec<Vec<f32>>> {
        let mut vectors: Vec<Vec<f32>> = vec![];
        for file in self.collect_files()? {
            for vector in read_vectors(&file)? {
                if vector.is_empty() {
                    bail!("{} 中包含空向量", file.display());
                }
                if let Some(dim) = vectors.first().map(Vec::len).filter(|&dim| dim != vector.len()) {
                    bail!("{} 的向量维度为 {}，与之前的 {dim} 不一致", file.display(), vector.len());
                }
                vectors.push(vector);
            }
            debug!("已读取 {}", file.display());
        }
        Ok(vectors)
    }
}

impl SubCommandExtend for AddCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let name = check_name(&self.name)?;
        let vectors = self.load_vectors()?;
        if vectors.is_empty() {
            bail!("没有找到任何特征向量");
        }
        let blobs = vectors.iter().map(|v| vector_to_bytes(v)).collect::<Vec<_>>();

        let db = open_db(&opts.conf_dir).await?;
        let id = crud::add_identity_with_vectors(&db, name, &blobs).await?;
        info!("已添加 {name} (ID: {id})，共 {} 个参考向量", vectors.len());
        println!("{id}");
        Ok(())
    }
}
