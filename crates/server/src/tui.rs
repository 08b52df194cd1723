use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Gauge, Paragraph, Row, Table};

use crate::server::{LogLevel, ServerStats};

/// Dashboard selection state, owned by the terminal thread.
#[derive(Debug, Default)]
pub struct TuiState {
    selected: usize,
}

impl TuiState {
    pub fn select_next(&mut self, players: usize) {
        if players > 0 {
            self.selected = (self.selected + 1) % players;
        }
    }

    pub fn select_prev(&mut self, players: usize) {
        if players > 0 {
            self.selected = (self.selected + players - 1) % players;
        }
    }

    pub fn selected(&self, players: usize) -> Option<usize> {
        (players > 0).then(|| self.selected.min(players - 1))
    }
}

pub fn render(frame: &mut Frame, stats: &ServerStats, state: &TuiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Length(8),
            Constraint::Min(6),
            Constraint::Length(8),
            Constraint::Length(3),
        ])
        .split(frame.area());

    render_header(frame, chunks[0], stats);
    render_status(frame, chunks[1], stats);
    render_network(frame, chunks[2], stats);
    render_players(frame, chunks[3], stats, state);
    render_log(frame, chunks[4], stats);
    render_help(frame, chunks[5]);
}

fn render_header(frame: &mut Frame, area: Rect, stats: &ServerStats) {
    let uptime = format_duration(stats.uptime_secs);
    let title = format!(" Arena Server - Uptime: {} ", uptime);

    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let text = format!(
        "Tick: {}  |  Players: {}  |  Entities: {}  |  Stale inputs: {}",
        stats.tick, stats.player_count, stats.entity_count, stats.stale_inputs
    );

    let paragraph = Paragraph::new(text)
        .block(block)
        .style(Style::default().fg(Color::White));

    frame.render_widget(paragraph, area);
}

fn render_status(frame: &mut Frame, area: Rect, stats: &ServerStats) {
    let block = Block::default()
        .title(" Status ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Green));

    let ratio = if stats.max_players == 0 {
        0.0
    } else {
        stats.player_count as f64 / stats.max_players as f64
    };
    let gauge = Gauge::default()
        .block(block)
        .gauge_style(Style::default().fg(Color::Green))
        .ratio(ratio.min(1.0))
        .label(format!("{}/{} players", stats.player_count, stats.max_players));

    frame.render_widget(gauge, area);
}

fn render_network(frame: &mut Frame, area: Rect, stats: &ServerStats) {
    let block = Block::default()
        .title(" Network ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));

    let socket = &stats.socket;
    let net = &stats.connections;
    let lines = vec![
        stat_line(
            "Packets: ",
            format!("{} sent / {} recv", socket.packets_sent, socket.packets_received),
        ),
        stat_line(
            "Bytes: ",
            format!(
                "{} sent / {} recv",
                format_bytes(socket.bytes_sent),
                format_bytes(socket.bytes_received)
            ),
        ),
        stat_line(
            "RTT: ",
            format!("{:.1}ms (+/- {:.1}ms)", net.rtt_ms, net.rtt_variance),
        ),
        Line::from(vec![
            Span::styled("Packet Loss: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!("{:.1}%", net.packet_loss_percent),
                Style::default().fg(if net.packet_loss_percent > 5.0 {
                    Color::Red
                } else {
                    Color::White
                }),
            ),
        ]),
        stat_line(
            "Reliable: ",
            format!(
                "{} resent / {} stale dropped",
                net.reliable_resent, net.stale_discarded
            ),
        ),
        stat_line(
            "Discarded: ",
            format!(
                "{} malformed / {} unreliable overflow",
                net.malformed, net.unreliable_dropped
            ),
        ),
    ];

    let paragraph = Paragraph::new(lines).block(block);
    frame.render_widget(paragraph, area);
}

fn stat_line(label: &'static str, value: String) -> Line<'static> {
    Line::from(vec![
        Span::styled(label, Style::default().fg(Color::Gray)),
        Span::styled(value, Style::default().fg(Color::White)),
    ])
}

fn render_players(frame: &mut Frame, area: Rect, stats: &ServerStats, state: &TuiState) {
    let block = Block::default()
        .title(" Players ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Magenta));

    let selected = state.selected(stats.players.len());
    let header = Row::new(["ID", "Name", "Address", "Avatar", "K/D", "Health", "RTT", "Resent"])
        .style(Style::default().fg(Color::Gray).add_modifier(Modifier::BOLD));

    let rows = stats.players.iter().enumerate().map(|(index, player)| {
        let style = if Some(index) == selected {
            Style::default().fg(Color::Black).bg(Color::Magenta)
        } else {
            Style::default().fg(Color::White)
        };
        Row::new(vec![
            Cell::from(player.id.to_string()),
            Cell::from(player.name.clone()),
            Cell::from(player.addr.to_string()),
            Cell::from(player.avatar.map_or_else(|| "-".to_string(), |id| id.to_string())),
            Cell::from(format!("{}/{}", player.kills, player.deaths)),
            Cell::from(format!("{:.0}", player.health)),
            Cell::from(format!("{:.0}ms", player.rtt_ms)),
            Cell::from(player.reliable_resent.to_string()),
        ])
        .style(style)
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(6),
            Constraint::Length(18),
            Constraint::Length(22),
            Constraint::Length(8),
            Constraint::Length(8),
            Constraint::Length(8),
            Constraint::Length(8),
            Constraint::Min(6),
        ],
    )
    .header(header)
    .block(block);

    frame.render_widget(table, area);
}

fn render_log(frame: &mut Frame, area: Rect, stats: &ServerStats) {
    let block = Block::default()
        .title(" Log ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Blue));

    let visible = usize::from(area.height.saturating_sub(2));
    let skip = stats.log.len().saturating_sub(visible);
    let lines: Vec<Line> = stats
        .log
        .iter()
        .skip(skip)
        .map(|(level, line)| {
            let color = match level {
                LogLevel::Info => Color::White,
                LogLevel::Warn => Color::Yellow,
                LogLevel::Error => Color::Red,
            };
            Line::styled(line.clone(), Style::default().fg(color))
        })
        .collect();

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_help(frame: &mut Frame, area: Rect) {
    let block = Block::default()
        .title(" Controls ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    let text = Paragraph::new("Up/Down select player  |  'k' kick  |  'q' or ESC quit")
        .block(block)
        .style(
            Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::ITALIC),
        );

    frame.render_widget(text, area);
}

fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;
    format!("{:02}:{:02}:{:02}", hours, mins, secs)
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{}B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1}KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1}MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1}GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_wraps_and_clamps() {
        let mut state = TuiState::default();
        assert_eq!(state.selected(0), None);

        state.select_prev(3);
        assert_eq!(state.selected(3), Some(2));
        state.select_next(3);
        assert_eq!(state.selected(3), Some(0));

        state.select_prev(3);
        assert_eq!(state.selected(1), Some(0));
    }

    #[test]
    fn formats_sizes_and_uptime() {
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(1536), "1.5KB");
        assert_eq!(format_duration(3725), "01:02:05");
    }
}
