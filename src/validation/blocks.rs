//! 配置文本的词法扫描
//!
//! 引号感知的花括号计数、`server` 块提取以及请求体大小解析

use once_cell::sync::Lazy;
use regex::Regex;

static SERVER_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^server\s*\{").expect("static regex"));

/// 花括号检查结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BraceCheck {
    Balanced,
    /// 在第 `line` 行出现多余的 `}`
    UnexpectedClose { line: usize },
    /// 文件结束时仍有 `depth` 个未闭合的 `{`
    Unclosed { depth: usize },
    /// 从第 `line` 行开始的引号没有闭合
    UnterminatedQuote { line: usize },
}

impl BraceCheck {
    pub fn error_message(&self) -> Option<String> {
        match self {
            BraceCheck::Balanced => None,
            BraceCheck::UnexpectedClose { line } => Some(format!(
                "Unbalanced braces detected in configuration: unexpected '}}' on line {}",
                line
            )),
            BraceCheck::Unclosed { depth } => Some(format!(
                "Unbalanced braces detected in configuration: {} unclosed '{{'",
                depth
            )),
            BraceCheck::UnterminatedQuote { line } => Some(format!(
                "Unbalanced braces detected in configuration: unterminated quote opened on line {}",
                line
            )),
        }
    }
}

/// 引号与注释感知的花括号计数器，可以跨行持续喂入文本
#[derive(Debug, Default)]
struct BraceCounter {
    depth: i64,
    quote: Option<char>,
    quote_line: usize,
    escaped: bool,
}

impl BraceCounter {
    /// 处理一行文本，返回第一次出现负深度的位置
    fn feed(&mut self, text: &str, line: usize) -> Option<usize> {
        for c in text.chars() {
            if self.escaped {
                self.escaped = false;
                continue;
            }
            if c == '\\' {
                self.escaped = true;
                continue;
            }
            if let Some(open) = self.quote {
                if c == open {
                    self.quote = None;
                }
                continue;
            }
            match c {
                '"' | '\'' => {
                    self.quote = Some(c);
                    self.quote_line = line;
                }
                // 注释一直到行尾
                '#' => break,
                '{' => self.depth += 1,
                '}' => {
                    self.depth -= 1;
                    if self.depth < 0 {
                        return Some(line);
                    }
                }
                _ => {}
            }
        }
        None
    }
}

/// 单遍扫描检查花括号是否配对
pub fn check_braces(content: &str) -> BraceCheck {
    let mut counter = BraceCounter::default();
    for (idx, line) in content.split_inclusive('\n').enumerate() {
        if let Some(line) = counter.feed(line, idx + 1) {
            return BraceCheck::UnexpectedClose { line };
        }
    }

    if counter.quote.is_some() {
        return BraceCheck::UnterminatedQuote {
            line: counter.quote_line,
        };
    }

    if counter.depth > 0 {
        return BraceCheck::Unclosed {
            depth: counter.depth as usize,
        };
    }

    BraceCheck::Balanced
}

/// 一个 `server { ... }` 块
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerBlock {
    /// 从 1 开始的块序号
    pub position: usize,
    pub start_line: usize,
    pub text: String,
}

/// 按行提取所有 `server` 块
///
/// 未闭合的块会一直延伸到文件末尾，由花括号检查负责报错
pub fn extract_server_blocks(content: &str) -> Vec<ServerBlock> {
    let mut blocks = Vec::new();
    let mut current: Option<(ServerBlock, BraceCounter)> = None;

    for (idx, line) in content.lines().enumerate() {
        let line_no = idx + 1;

        if current.is_none() && SERVER_OPEN.is_match(line.trim_start()) {
            current = Some((
                ServerBlock {
                    position: blocks.len() + 1,
                    start_line: line_no,
                    text: String::new(),
                },
                BraceCounter::default(),
            ));
        }

        let Some((block, counter)) = current.as_mut() else {
            continue;
        };

        block.text.push_str(line);
        block.text.push('\n');
        let underflow = counter.feed(line, line_no).is_some();

        if underflow || (counter.depth == 0 && counter.quote.is_none()) {
            if let Some((block, _)) = current.take() {
                blocks.push(block);
            }
        }
    }

    if let Some((block, _)) = current {
        blocks.push(block);
    }

    blocks
}

/// 解析 `client_max_body_size` 的取值，返回字节数
///
/// 支持 `k`/`m`/`g` 后缀（不区分大小写），无后缀按字节计
pub fn parse_body_size(value: &str) -> Option<u64> {
    let value = value.trim().to_ascii_lowercase();
    let (digits, multiplier) = match value.chars().last()? {
        'k' => (&value[..value.len() - 1], 1024u64),
        'm' => (&value[..value.len() - 1], 1024 * 1024),
        'g' => (&value[..value.len() - 1], 1024 * 1024 * 1024),
        _ => (value.as_str(), 1),
    };

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    digits.parse::<u64>().ok()?.checked_mul(multiplier)
}
