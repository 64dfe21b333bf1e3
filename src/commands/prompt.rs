//! 交互式输入：确认、冲突选择、云端目录浏览

use crate::core::conflict::{ConflictChooser, ResolutionAction};
use crate::core::record::{Conflict, ROOT_FOLDER_ID};
use crate::error::Result;
use crate::storage::{RemoteClient, RemoteItem};
use std::io::{self, BufRead, Write};

/// 按行读取输入
///
/// 标准输入每次读取时才加锁，不会在等待期间长期占用。
pub trait LineReader {
    fn read_line(&mut self, buf: &mut String) -> io::Result<usize>;
}

impl LineReader for io::Stdin {
    fn read_line(&mut self, buf: &mut String) -> io::Result<usize> {
        io::Stdin::read_line(self, buf)
    }
}

impl<T: AsRef<[u8]>> LineReader for io::Cursor<T> {
    fn read_line(&mut self, buf: &mut String) -> io::Result<usize> {
        BufRead::read_line(self, buf)
    }
}

/// 按行读取回答的提示器
pub struct Prompter<R, W> {
    input: R,
    output: W,
}

/// 绑定标准输入输出
pub fn stdio() -> Prompter<io::Stdin, io::Stdout> {
    Prompter::new(io::stdin(), io::stdout())
}

impl<R: LineReader, W: Write> Prompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub fn say(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.output, "{}", text)
    }

    /// 输出提示并读取一行（去掉首尾空白），输入结束时返回 None
    pub fn ask(&mut self, question: &str) -> io::Result<Option<String>> {
        write!(self.output, "{}", question)?;
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    /// `(y/N)` 确认，只有 y/yes 视为同意
    pub fn confirm(&mut self, question: &str) -> io::Result<bool> {
        let answer = self.ask(&format!("{} (y/N): ", question))?;
        Ok(matches!(
            answer.as_deref().map(str::to_lowercase).as_deref(),
            Some("y") | Some("yes")
        ))
    }

    /// 冲突处理菜单；无效输入视为跳过
    pub fn choose_action(&mut self, conflict: &Conflict) -> io::Result<Option<ResolutionAction>> {
        writeln!(self.output, "Conflict: {}", conflict.path)?;
        writeln!(self.output, "Choose resolution:")?;
        writeln!(self.output, "  1) Prefer Drive (overwrite local)")?;
        writeln!(self.output, "  2) Prefer Local (overwrite Drive)")?;
        writeln!(self.output, "  3) Keep both")?;
        writeln!(self.output, "  4) Skip")?;

        let Some(answer) = self.ask("> ")? else {
            return Ok(None);
        };
        let action = match answer.as_str() {
            "1" => ResolutionAction::PreferRemote,
            "2" => ResolutionAction::PreferLocal,
            "3" => ResolutionAction::KeepBoth,
            _ => {
                writeln!(self.output, "  Skipped")?;
                ResolutionAction::Skip
            }
        };
        Ok(Some(action))
    }
}

/// 终端冲突选择器
pub struct TerminalChooser;

impl ConflictChooser for TerminalChooser {
    fn choose(&self, conflict: &Conflict) -> Option<ResolutionAction> {
        match stdio().choose_action(conflict) {
            Ok(action) => action,
            Err(e) => {
                tracing::warn!("读取冲突选择失败: {}", e);
                None
            }
        }
    }
}

/// 逐层浏览云端文件夹，返回选中目录的路径（`a/b`）；输入结束时返回 None
///
/// 当前目录没有子目录时直接选中当前目录。
pub async fn choose_drive_dir<R: LineReader, W: Write>(
    prompter: &mut Prompter<R, W>,
    client: &dyn RemoteClient,
) -> Result<Option<String>> {
    let mut path_parts: Vec<String> = Vec::new();
    let mut id_stack: Vec<String> = vec![ROOT_FOLDER_ID.to_string()];

    loop {
        let current_id = id_stack.last().map(String::as_str).unwrap_or(ROOT_FOLDER_ID);
        let mut dirs: Vec<RemoteItem> = client.list_folders(current_id).await?;
        dirs.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));

        prompter.say(&format!("\nCurrent directory: /{}\n", path_parts.join("/")))?;

        if dirs.is_empty() {
            if path_parts.is_empty() {
                prompter.say("No directories found on Drive.")?;
                return Ok(None);
            }
            prompter.say("No subdirectories here.")?;
            prompter.say("Downloading this directory.")?;
            return Ok(Some(path_parts.join("/")));
        }

        for (i, d) in dirs.iter().enumerate() {
            prompter.say(&format!("  {}) {}/", i + 1, d.name))?;
        }

        let Some(answer) = prompter.ask("\nSelect a directory: ")? else {
            return Ok(None);
        };
        let selected = match answer.parse::<usize>() {
            Ok(n) if (1..=dirs.len()).contains(&n) => &dirs[n - 1],
            _ => {
                prompter.say("Invalid selection")?;
                continue;
            }
        };

        prompter.say(&format!("\nSelected: {}/\n", selected.name))?;
        prompter.say("What would you like to do?")?;
        prompter.say("  1) Download THIS directory")?;
        prompter.say("  2) Go inside this directory")?;
        if !path_parts.is_empty() {
            prompter.say("  3) Go back")?;
        }

        let Some(action) = prompter.ask("\n> ")? else {
            return Ok(None);
        };
        match action.as_str() {
            "1" => {
                path_parts.push(selected.name.clone());
                return Ok(Some(path_parts.join("/")));
            }
            "2" => {
                path_parts.push(selected.name.clone());
                id_stack.push(selected.id.clone());
            }
            "3" if !path_parts.is_empty() => {
                path_parts.pop();
                id_stack.pop();
            }
            _ => prompter.say("Invalid choice")?,
        }
    }
}
