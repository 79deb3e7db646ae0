//! Parser for the response to the `ListPlayers` command.
//!
//! ```text
//! ----- Active Players -----
//! ID: 0 | SteamID: 76561197999957991 | Name: Jon | Team ID: 1 | Squad ID: 1 | Is Leader: True | Role: USA_SL_01
//! ----- Recently Disconnected Players [Max of 15] -----
//! ID: 1 | SteamID: 76561197989362395 | Since Disconnect: 00m.04s | Name: creaman
//! ```

use std::fmt::{Display, Formatter};
use std::time::Duration;

use crate::Client;

const ACTIVE_PLAYERS_HEADER: &str = "----- Active Players -----";
const DISCONNECTED_PLAYERS_PREFIX: &str = "----- Recently Disconnected Players ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivePlayer {
    pub match_id: u32,
    pub steam_id: String,
    pub name: String,

    /// Team index, as shown by the server.
    pub team_index: u32,

    /// 1-indexed squad, or `None` if the player is not part of a squad.
    pub squad_index: Option<u32>,

    pub is_squad_lead: bool,

    /// The player's kit, e.g. `USA_Rifleman_01`.
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectedPlayer {
    pub match_id: u32,
    pub steam_id: String,
    pub name: String,

    /// Time since the player disconnected, when the list was produced.
    pub since_disconnect: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayerList {
    pub active_players: Vec<ActivePlayer>,
    pub disconnected_players: Vec<DisconnectedPlayer>,
}

/// A line of the player list that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineError {
    /// 1-indexed line number.
    pub line: usize,
    pub message: String,
}

impl Display for LineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PlayerListError {
    #[error(transparent)]
    Rcon(#[from] crate::Error),

    #[error("response returned from rcon is not a player list")]
    NotAPlayerList,

    /// Some lines could not be parsed. `list` holds every line that could.
    #[error("{}", describe_invalid_lines(.errors))]
    InvalidLines {
        list: PlayerList,
        errors: Vec<LineError>,
    },
}

fn describe_invalid_lines(errors: &[LineError]) -> String {
    match errors.first() {
        Some(first) => format!(
            "{} lines of the player list could not be parsed, first at {}",
            errors.len(),
            first
        ),
        None => "player list could not be parsed".to_string(),
    }
}

/// Executes `ListPlayers` and parses the response.
pub async fn list_players(client: &Client) -> Result<PlayerList, PlayerListError> {
    let response = client.execute("ListPlayers").await?;
    parse_player_list(&response)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    LookingForActivePlayerHeader,
    ReadingActivePlayers,
    ReadingDisconnectedPlayers,
}

/// Parses the response to `ListPlayers`.
///
/// An empty response is an empty list.
pub fn parse_player_list(text: &str) -> Result<PlayerList, PlayerListError> {
    if text.is_empty() {
        return Ok(PlayerList::default());
    }

    if !text.starts_with(ACTIVE_PLAYERS_HEADER) {
        return Err(PlayerListError::NotAPlayerList);
    }

    let mut list = PlayerList::default();
    let mut errors = Vec::new();
    let mut state = State::LookingForActivePlayerHeader;

    for (index, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        let res = match state {
            State::LookingForActivePlayerHeader => {
                if line.starts_with(ACTIVE_PLAYERS_HEADER) {
                    state = State::ReadingActivePlayers;
                    Ok(())
                } else {
                    Err(format!("expected {:?}, got {:?}", ACTIVE_PLAYERS_HEADER, line))
                }
            }
            State::ReadingActivePlayers if line.starts_with(DISCONNECTED_PLAYERS_PREFIX) => {
                state = State::ReadingDisconnectedPlayers;
                Ok(())
            }
            State::ReadingActivePlayers => parse_active_player(line)
                .map(|player| list.active_players.push(player))
                .map_err(|err| format!("line cannot be parsed as an active player: {}", err)),
            State::ReadingDisconnectedPlayers => parse_disconnected_player(line)
                .map(|player| list.disconnected_players.push(player))
                .map_err(|err| format!("line cannot be parsed as a disconnected player: {}", err)),
        };

        if let Err(message) = res {
            errors.push(LineError {
                line: index + 1,
                message,
            });
        }
    }

    if errors.is_empty() {
        Ok(list)
    } else {
        Err(PlayerListError::InvalidLines { list, errors })
    }
}

/// `ID: <n> | SteamID: <n> | Name: <name> | Team ID: <n> | Squad ID: <n or N/A> | Is Leader: <bool> | Role: <role>`
///
/// Names can contain anything, so the fields after the name are split off from the right.
fn parse_active_player(line: &str) -> Result<ActivePlayer, String> {
    let (rest, role) = split_field_last(line, "Role")?;
    if role.is_empty() || role.contains('|') {
        return Err(format!("invalid role {:?}", role));
    }

    let (rest, is_leader) = split_field_last(rest, "Is Leader")?;
    if is_leader.is_empty() || !is_leader.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(format!("invalid leader flag {:?}", is_leader));
    }

    let (rest, squad_index) = split_field_last(rest, "Squad ID")?;
    let squad_index = match squad_index {
        "N/A" => None,
        squad_index => Some(parse_number("squad index", squad_index)?),
    };

    let (rest, team_index) = split_field_last(rest, "Team ID")?;
    let team_index = parse_number("team index", team_index)?;

    let (match_id, rest) = split_leading_id(rest)?;
    let (steam_id, name) = rest
        .split_once(" | Name: ")
        .ok_or_else(|| "missing Name field".to_string())?;
    let steam_id = parse_steam_id(steam_id)?;
    if name.is_empty() {
        return Err("empty name".to_string());
    }

    Ok(ActivePlayer {
        match_id,
        steam_id,
        name: name.to_string(),
        team_index,
        squad_index,
        is_squad_lead: is_leader == "True",
        role: role.to_string(),
    })
}

/// `ID: <n> | SteamID: <n> | Since Disconnect: <mm>m.<ss>s | Name: <name>`
fn parse_disconnected_player(line: &str) -> Result<DisconnectedPlayer, String> {
    let (match_id, rest) = split_leading_id(line)?;
    let (steam_id, rest) = rest
        .split_once(" | Since Disconnect: ")
        .ok_or_else(|| "missing Since Disconnect field".to_string())?;
    let steam_id = parse_steam_id(steam_id)?;

    let (since, name) = rest
        .split_once(" | Name: ")
        .ok_or_else(|| "missing Name field".to_string())?;
    if name.is_empty() {
        return Err("empty name".to_string());
    }

    Ok(DisconnectedPlayer {
        match_id,
        steam_id,
        name: name.to_string(),
        since_disconnect: parse_since_disconnect(since)?,
    })
}

/// Splits `... | <field>: <value>` into the part before the field and the value.
fn split_field_last<'a>(line: &'a str, field: &str) -> Result<(&'a str, &'a str), String> {
    line.rsplit_once(&format!(" | {}: ", field))
        .ok_or_else(|| format!("missing {} field", field))
}

/// Splits `ID: <n> | SteamID: <rest>` into the match ID and the rest.
fn split_leading_id(line: &str) -> Result<(u32, &str), String> {
    let rest = line
        .strip_prefix("ID: ")
        .ok_or_else(|| "missing ID field".to_string())?;
    let (match_id, rest) = rest
        .split_once(" | SteamID: ")
        .ok_or_else(|| "missing SteamID field".to_string())?;
    Ok((parse_number("match ID", match_id)?, rest))
}

fn parse_steam_id(value: &str) -> Result<String, String> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("invalid steam ID {:?}", value));
    }
    Ok(value.to_string())
}

/// `04m.13s`
fn parse_since_disconnect(value: &str) -> Result<Duration, String> {
    let invalid = || format!("invalid disconnect time {:?}", value);

    let (minutes, seconds) = value.split_once('m').ok_or_else(invalid)?;
    let mut seconds = seconds.chars();
    seconds.next().ok_or_else(invalid)?;
    let seconds = seconds.as_str().strip_suffix('s').ok_or_else(invalid)?;

    let minutes = parse_number("disconnected minutes", minutes)?;
    let seconds = parse_number("disconnected seconds", seconds)?;
    Ok(Duration::from_secs(u64::from(minutes) * 60 + u64::from(seconds)))
}

fn parse_number(what: &str, value: &str) -> Result<u32, String> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("could not parse {:?} as {}", value, what));
    }
    value
        .parse()
        .map_err(|_| format!("could not parse {:?} as {}", value, what))
}
