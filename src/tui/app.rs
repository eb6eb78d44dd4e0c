//! Debugger application state and logic.

use crate::{Cpu, Word};
use crate::asm::disasm::{disassemble_range, format_instruction};
use std::collections::HashSet;

/// Debugger application state.
pub struct DebuggerApp {
    /// The CPU being debugged.
    pub cpu: Cpu,
    /// Loaded image, kept for reset.
    pub program: Vec<Word>,
    /// Breakpoints (by address).
    pub breakpoints: HashSet<u16>,
    /// Is the debugger running continuously?
    pub running: bool,
    /// Should we quit?
    pub should_quit: bool,
    /// Status message to display.
    pub status: String,
    /// Everything the program has printed so far.
    pub output: String,
    /// Result once the program halts.
    pub exit_value: Option<i16>,
}

impl DebuggerApp {
    /// Create a new debugger with a loaded image.
    pub fn new(program: Vec<Word>) -> Self {
        let mut app = Self {
            cpu: Cpu::new(),
            program,
            breakpoints: HashSet::new(),
            running: false,
            should_quit: false,
            status: String::new(),
            output: String::new(),
            exit_value: None,
        };
        app.reset();
        app.status = "Ready. Press 's' to step, 'r' to run, 'q' to quit.".into();
        app
    }

    /// Step one instruction.
    pub fn step(&mut self) {
        if !self.cpu.is_running() {
            self.status = format!("CPU stopped: {:?}", self.cpu.state);
            self.running = false;
            return;
        }

        let pc = self.cpu.regs.pc;
        let mut printed = Vec::new();
        let result = self.cpu.step(&mut printed);
        self.output.push_str(&String::from_utf8_lossy(&printed));

        match result {
            Ok(instr) => {
                self.status = format!("PC={:04x}: {}", pc, format_instruction(&instr));
                if self.cpu.is_halted() {
                    self.finish();
                }
            }
            Err(e) => {
                self.status = format!("Fault: {}", e);
                self.running = false;
            }
        }
    }

    /// Read the result after HALT.
    fn finish(&mut self) {
        self.running = false;
        match self.cpu.exit_value() {
            Ok(value) => {
                self.exit_value = Some(value.as_signed());
                self.status = format!("Halted after {} cycles: exit({})", self.cpu.cycles, value);
            }
            Err(e) => self.status = format!("Halted with no result: {}", e),
        }
    }

    /// Run until halt, breakpoint, or fault.
    ///
    /// Resuming from a breakpoint steps over it first.
    pub fn run(&mut self) {
        self.running = true;
        self.status = "Running...".into();
        if self.at_breakpoint() {
            self.step();
        }
    }

    fn at_breakpoint(&self) -> bool {
        self.cpu.regs.pc_address().is_ok_and(|pc| self.breakpoints.contains(&pc))
    }

    /// Run one iteration of continuous execution.
    pub fn tick(&mut self) {
        if !self.running {
            return;
        }

        if !self.cpu.is_running() {
            self.running = false;
            return;
        }

        if self.at_breakpoint() {
            self.running = false;
            self.status = format!("Breakpoint at PC={:04x}", self.cpu.regs.pc);
            return;
        }

        self.step();
    }

    /// Toggle breakpoint at current PC.
    pub fn toggle_breakpoint(&mut self) {
        let Ok(pc) = self.cpu.regs.pc_address() else {
            return;
        };
        if self.breakpoints.remove(&pc) {
            self.status = format!("Removed breakpoint at PC={:04x}", pc);
        } else {
            self.breakpoints.insert(pc);
            self.status = format!("Set breakpoint at PC={:04x}", pc);
        }
    }

    /// Reset CPU to initial state.
    pub fn reset(&mut self) {
        self.cpu = Cpu::new();
        if let Err(e) = self.cpu.load_image(&self.program) {
            self.status = format!("Load failed: {}", e);
        } else {
            self.status = "Reset. Ready.".into();
        }
        self.running = false;
        self.output.clear();
        self.exit_value = None;
    }

    /// Disassembly from the current PC onward, without disturbing the cache.
    pub fn get_disassembly(&self, lines: usize) -> Vec<(u16, String, bool)> {
        let Ok(pc) = self.cpu.regs.pc_address() else {
            return Vec::new();
        };

        let window: Vec<Word> = (0..lines * 2)
            .map_while(|i| u16::try_from(usize::from(pc) + i).ok())
            .map(|addr| self.cpu.cache.peek(addr))
            .collect();

        disassemble_range(&window, pc)
            .into_iter()
            .take(lines)
            .map(|(addr, text)| (addr, text, addr == pc))
            .collect()
    }

    /// The top `count` stack slots as (address, value), top first.
    pub fn stack_view(&self, count: usize) -> Vec<(u16, Word)> {
        let depth = self.cpu.regs.stack_depth() as usize;
        (0..count.min(depth))
            .filter_map(|i| u16::try_from(self.cpu.regs.sp as usize + i).ok())
            .map(|addr| (addr, self.cpu.cache.peek(addr)))
            .collect()
    }
}

/// Run the debugger with an image.
pub fn run_debugger(program: Vec<Word>) -> std::io::Result<()> {
    use crossterm::{
        event::{self, Event, KeyCode, KeyEventKind},
        terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
        ExecutableCommand,
    };
    use ratatui::prelude::*;
    use std::io::stdout;
    use std::time::Duration;

    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let mut app = DebuggerApp::new(program);

    // Main loop
    loop {
        terminal.draw(|frame| {
            super::ui::draw(frame, &app);
        })?;

        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') => app.should_quit = true,
                        KeyCode::Char('s') => {
                            app.running = false;
                            app.step();
                        }
                        KeyCode::Char('r') => app.run(),
                        KeyCode::Char('p') => {
                            app.running = false;
                            app.status = "Paused.".into();
                        }
                        KeyCode::Char('b') => app.toggle_breakpoint(),
                        KeyCode::Char('x') => app.reset(),
                        _ => {}
                    }
                }
            }
        }

        // A batch per frame keeps long programs moving.
        for _ in 0..256 {
            if !app.running {
                break;
            }
            app.tick();
        }

        if app.should_quit {
            break;
        }
    }

    // Restore terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    Ok(())
}
