//! 进程参数
//!
//! 把命令行解析成扁平的键值表，供模块按名称读取，不需要预先声明参数：
//!
//! - `--key=value`、`--key value`
//! - `--flag` 得到 `"true"`，`--no-flag` 得到 `"false"`
//! - 不以 `--` 开头的位置参数忽略
//!
//! 环境变量可以补充未在命令行出现的键，例如 `CHIPS_ROOT_DIR` 对应 `root-dir`。

use std::collections::BTreeMap;
use std::path::PathBuf;

/// 环境变量前缀
pub const ENV_PREFIX: &str = "CHIPS";

/// 扁平的进程参数表
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessArgs {
    values: BTreeMap<String, String>,
}

impl ProcessArgs {
    /// 创建空参数表
    pub fn new() -> Self {
        Self::default()
    }

    /// 解析参数列表（不含程序名）
    pub fn parse<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        let mut values = BTreeMap::new();
        let mut index = 0;

        while index < args.len() {
            let arg = &args[index];
            index += 1;

            let Some(body) = arg.strip_prefix("--") else {
                continue;
            };
            if body.is_empty() {
                // `--` 之后全部是位置参数
                break;
            }

            if let Some((key, value)) = body.split_once('=') {
                values.insert(key.to_string(), value.to_string());
                continue;
            }

            match args.get(index) {
                Some(next) if !next.starts_with("--") => {
                    values.insert(body.to_string(), next.clone());
                    index += 1;
                }
                _ => match body.strip_prefix("no-") {
                    Some(flag) => {
                        values.insert(flag.to_string(), "false".to_string());
                    }
                    None => {
                        values.insert(body.to_string(), "true".to_string());
                    }
                },
            }
        }

        Self { values }
    }

    /// 解析当前进程的命令行并补充环境变量
    pub fn from_env() -> Self {
        Self::parse(std::env::args().skip(1)).with_env_vars(std::env::vars(), ENV_PREFIX)
    }

    /// 用环境变量补充未出现的键
    ///
    /// `PREFIX_SOME_KEY` 对应键 `some-key`。
    pub fn with_env_vars<I>(mut self, vars: I, prefix: &str) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let prefix = format!("{}_", prefix);
        for (name, value) in vars {
            if let Some(rest) = name.strip_prefix(&prefix) {
                let key = rest.to_lowercase().replace('_', "-");
                if !key.is_empty() {
                    self.values.entry(key).or_insert(value);
                }
            }
        }
        self
    }

    /// 读取参数
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// 读取布尔参数，`true`/`1`/`yes` 为真
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key)
            .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
    }

    /// 写入参数
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// 根目录参数（`root-dir` 或 `rootDir`）
    pub fn root_dir(&self) -> Option<PathBuf> {
        self.get("root-dir")
            .or_else(|| self.get("rootDir"))
            .map(PathBuf::from)
    }

    /// 遍历全部参数
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// 参数个数
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
