//! UI rendering for the debugger.

use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Paragraph, List, ListItem, Wrap},
    style::{Color, Style, Modifier},
};
use crate::cpu::cache::line_index;
use super::app::DebuggerApp;

/// Main draw function.
pub fn draw(frame: &mut Frame, app: &DebuggerApp) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(55),
            Constraint::Percentage(45),
        ])
        .split(frame.area());

    // Left side: code, registers, output and status
    let left_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(8),
            Constraint::Length(9),
            Constraint::Length(6),
            Constraint::Length(3),
        ])
        .split(chunks[0]);

    draw_disassembly(frame, left_chunks[0], app);
    draw_registers(frame, left_chunks[1], app);
    draw_output(frame, left_chunks[2], app);
    draw_status(frame, left_chunks[3], app);

    // Right side: cache lines and help
    let right_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(10),
            Constraint::Length(4),
        ])
        .split(chunks[1]);

    draw_cache(frame, right_chunks[0], app);
    draw_help(frame, right_chunks[1]);
}

/// Draw disassembly from the current PC.
fn draw_disassembly(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let disasm = app.get_disassembly((area.height as usize).saturating_sub(2));

    let items: Vec<ListItem> = disasm
        .iter()
        .map(|(addr, instr, is_current)| {
            let prefix = if *is_current { "▶ " } else { "  " };
            let bp = if app.breakpoints.contains(addr) { "●" } else { " " };
            let text = format!("{}{:04x}: {}", prefix, addr, instr);

            let style = if *is_current {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else if app.breakpoints.contains(addr) {
                Style::default().fg(Color::Red)
            } else {
                Style::default()
            };

            ListItem::new(format!("{} {}", bp, text)).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(Block::default()
            .title(" Disassembly ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan)));

    frame.render_widget(list, area);
}

/// Draw registers, counters and the top of the stack.
fn draw_registers(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let regs = &app.cpu.regs;
    let stats = app.cpu.stats();

    let sp_text = if regs.stack_is_empty() {
        "empty".to_string()
    } else {
        format!("{:04x}", regs.sp)
    };

    let stack: Vec<String> = app.stack_view(6)
        .iter()
        .map(|(_, value)| value.to_string())
        .collect();

    let content = vec![
        Line::from(vec![
            Span::raw("PC: "),
            Span::styled(format!("{:04x}", regs.pc), Style::default().fg(Color::Yellow)),
            Span::raw("   SP: "),
            Span::styled(sp_text, Style::default().fg(Color::White)),
            Span::raw("   FP: "),
            Span::styled(format!("{:04x}", regs.fp), Style::default().fg(Color::White)),
        ]),
        Line::from(vec![
            Span::raw("Stack: "),
            Span::styled(stack.join(" "), Style::default().fg(Color::White)),
        ]),
        Line::from(vec![
            Span::raw("Hits: "),
            Span::styled(stats.cache_hits.to_string(), Style::default().fg(Color::Green)),
            Span::raw("   Misses: "),
            Span::styled(stats.cache_misses.to_string(), Style::default().fg(Color::Red)),
        ]),
        Line::from(vec![
            Span::raw("Mem reads: "),
            Span::styled(stats.main_memory_reads.to_string(), Style::default().fg(Color::White)),
            Span::raw("   Mem writes: "),
            Span::styled(stats.main_memory_writes.to_string(), Style::default().fg(Color::White)),
        ]),
        Line::from(vec![
            Span::raw("Cycles: "),
            Span::styled(format!("{}", app.cpu.cycles), Style::default().fg(Color::Cyan)),
            Span::raw("   State: "),
            Span::styled(format!("{:?}", app.cpu.state),
                if app.cpu.is_running() {
                    Style::default().fg(Color::Green)
                } else {
                    Style::default().fg(Color::Red)
                }),
        ]),
    ];

    let paragraph = Paragraph::new(content)
        .block(Block::default()
            .title(" Registers ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Green)));

    frame.render_widget(paragraph, area);
}

/// Draw the 32 cache lines.
fn draw_cache(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let pc_line = app.cpu.regs.pc_address().ok().map(line_index);

    let items: Vec<ListItem> = app.cpu.cache.lines()
        .iter()
        .enumerate()
        .map(|(idx, line)| {
            let text = if line.valid {
                format!("{:02}: {:04x} = {:<6} {}",
                    idx, line.tag, line.contents, if line.dirty { "dirty" } else { "" })
            } else {
                format!("{:02}: ----", idx)
            };

            let style = if pc_line == Some(idx) {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else if line.valid && line.dirty {
                Style::default().fg(Color::Red)
            } else if line.valid {
                Style::default().fg(Color::White)
            } else {
                Style::default().fg(Color::DarkGray)
            };

            ListItem::new(text).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(Block::default()
            .title(" Cache ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Magenta)));

    frame.render_widget(list, area);
}

/// Draw program output.
fn draw_output(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let output = Paragraph::new(app.output.clone())
        .wrap(Wrap { trim: false })
        .block(Block::default()
            .title(" Output ")
            .borders(Borders::ALL));

    frame.render_widget(output, area);
}

/// Draw status bar.
fn draw_status(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let status = Paragraph::new(app.status.clone())
        .style(Style::default().fg(Color::White))
        .block(Block::default()
            .title(" Status ")
            .borders(Borders::ALL));

    frame.render_widget(status, area);
}

/// Draw help panel.
fn draw_help(frame: &mut Frame, area: Rect) {
    let help = Paragraph::new(vec![
        Line::from("s: Step  r: Run  p: Pause  b: Breakpoint"),
        Line::from("x: Reset  q: Quit"),
    ])
    .style(Style::default().fg(Color::DarkGray))
    .block(Block::default()
        .title(" Help ")
        .borders(Borders::ALL));

    frame.render_widget(help, area);
}
