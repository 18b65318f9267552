//! Typed command construction
//!
//! Compile and run commands are described as static templates made of
//! literal arguments and named slots. Rendering a template produces a
//! discrete argument vector; nothing is ever joined into a shell string.

/// Named placeholder inside a command template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Entry source file, relative to the working directory
    Source,
    /// Compiled program path
    Output,
    /// Directory receiving compiled artifacts
    OutputDir,
    /// Entry class / module name (e.g. Java public class)
    EntryName,
}

/// One element of a command template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arg {
    Lit(&'static str),
    Slot(Slot),
}

/// Values substituted into template slots
#[derive(Debug, Clone)]
pub struct CommandSlots {
    pub source: String,
    pub output: String,
    pub output_dir: String,
    pub entry_name: String,
}

impl CommandSlots {
    fn value(&self, slot: Slot) -> &str {
        match slot {
            Slot::Source => &self.source,
            Slot::Output => &self.output,
            Slot::OutputDir => &self.output_dir,
            Slot::EntryName => &self.entry_name,
        }
    }
}

/// Static command template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandTemplate(pub &'static [Arg]);

impl CommandTemplate {
    /// Render into an argument vector (first element is the program)
    pub fn render(&self, slots: &CommandSlots) -> Vec<String> {
        self.0
            .iter()
            .map(|arg| match arg {
                Arg::Lit(s) => (*s).to_string(),
                Arg::Slot(slot) => slots.value(*slot).to_string(),
            })
            .collect()
    }
}

/// Render an argument vector as a Dockerfile exec-form array (`["a", "b"]`)
pub fn to_exec_form(argv: &[String]) -> String {
    // serde_json handles quoting and escaping of every element
    serde_json::to_string(argv).unwrap_or_else(|_| "[]".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slots() -> CommandSlots {
        CommandSlots {
            source: "Solution.java".into(),
            output: "/app/main".into(),
            output_dir: "/app".into(),
            entry_name: "Solution".into(),
        }
    }

    #[test]
    fn test_render_fills_slots() {
        const JAVA_RUN: CommandTemplate = CommandTemplate(&[
            Arg::Lit("java"),
            Arg::Lit("-cp"),
            Arg::Slot(Slot::OutputDir),
            Arg::Slot(Slot::EntryName),
        ]);

        assert_eq!(JAVA_RUN.render(&slots()), vec!["java", "-cp", "/app", "Solution"]);
    }

    #[test]
    fn test_slot_values_are_not_split() {
        const RUN: CommandTemplate = CommandTemplate(&[Arg::Lit("python3"), Arg::Slot(Slot::Source)]);
        let mut slots = slots();
        slots.source = "my file; rm -rf /.py".into();

        let argv = RUN.render(&slots);
        assert_eq!(argv.len(), 2);
        assert_eq!(argv[1], "my file; rm -rf /.py");
    }

    #[test]
    fn test_exec_form_escapes_quotes() {
        let argv = vec!["echo".to_string(), "say \"hi\"".to_string()];
        assert_eq!(to_exec_form(&argv), r#"["echo","say \"hi\""]"#);
    }
}
