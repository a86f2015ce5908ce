use crate::entities::error::DomainError;
use crate::entities::flag::{FlagType, FlagValue};
use crate::entities::plot::Plot;
use crate::entities::rank::{TownRank, NODE_PLOT_BYPASS};
use crate::entities::{PlotId, TownId};
use crate::world::position::{Location, Volume};
use crate::world::universe::{Universe, UniverseError};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

/// Who runs a command and where they stand.
pub struct CommandContext<'a> {
    pub universe: &'a mut Universe,
    pub principal: Uuid,
    pub location: Location,
}

/// A localization key plus its arguments. Text is rendered by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub key: &'static str,
    pub args: Vec<String>,
}

impl Reply {
    pub fn new(key: &'static str, args: Vec<String>) -> Self {
        Self { key, args }
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unknown command '{0}'")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("missing argument")]
    MissingArgument,
    #[error("missing permission node {0}")]
    Permission(&'static str),
    #[error("not part of a town")]
    NoTown,
    #[error("cannot grant rank {0} above your own")]
    RankTooHigh(TownRank),
    #[error("unknown resident '{0}'")]
    UnknownResident(String),
    #[error("unknown town '{0}'")]
    UnknownTown(String),
    #[error("no plot here")]
    NoPlot,
    #[error("invalid argument '{0}'")]
    InvalidArgument(String),
    #[error(transparent)]
    Universe(#[from] UniverseError),
}

impl From<DomainError> for CommandError {
    fn from(err: DomainError) -> Self {
        CommandError::Universe(err.into())
    }
}

impl CommandError {
    /// Localization key shown to the sender.
    pub fn key(&self) -> &'static str {
        match self {
            CommandError::Unknown(_) => "towns.cmd.err.unknown",
            CommandError::Usage(_) | CommandError::MissingArgument => "towns.cmd.err.usage",
            CommandError::Permission(_) => "towns.cmd.err.permission",
            CommandError::NoTown => "towns.cmd.err.partOfTown",
            CommandError::RankTooHigh(_) => "towns.cmd.err.rank.tooHigh",
            CommandError::UnknownResident(_) => "towns.cmd.err.resident.notExist",
            CommandError::UnknownTown(_) => "towns.cmd.err.town.notExist",
            CommandError::NoPlot => "towns.cmd.err.plot.notHere",
            CommandError::InvalidArgument(_) => "towns.cmd.err.argument",
            CommandError::Universe(UniverseError::Persistence(_)) => "towns.err.datasource",
            CommandError::Universe(UniverseError::Domain(err)) => domain_key(err),
        }
    }
}

fn domain_key(err: &DomainError) -> &'static str {
    match err {
        DomainError::AlreadyClaimed { .. } => "towns.cmd.err.block.alreadyClaimed",
        DomainError::NotClaimed { .. } => "towns.cmd.err.block.notClaimed",
        DomainError::BlockQuotaExceeded { .. } => "towns.cmd.err.block.quota",
        DomainError::BlockHasPlots { .. } => "towns.cmd.err.block.hasPlots",
        DomainError::LastBlock(_) => "towns.cmd.err.block.last",
        DomainError::OutOfBounds { .. } => "towns.cmd.err.plot.outOfBounds",
        DomainError::QuotaExceeded { .. } => "towns.cmd.err.plot.quota",
        DomainError::LastMayor(_) => "towns.cmd.err.rank.lastMayor",
        DomainError::NameTaken(_) => "towns.cmd.err.nameTaken",
        DomainError::NotAMember { .. } => "towns.cmd.err.resident.notMember",
        DomainError::AlreadyMember { .. } => "towns.cmd.err.resident.alreadyMember",
        DomainError::AlreadyOwner { .. } => "towns.cmd.err.plot.alreadyOwner",
        DomainError::NotAnOwner { .. } => "towns.cmd.err.plot.notOwner",
        DomainError::AlreadyInNation(_) => "towns.cmd.err.nation.alreadyIn",
        DomainError::NotInNation(_) => "towns.cmd.err.nation.notIn",
        DomainError::InvalidFlagValue { .. } => "towns.cmd.err.perm.valueNotValid",
        DomainError::UnknownTown(_) => "towns.cmd.err.town.notExist",
        DomainError::UnknownPlot(_) => "towns.cmd.err.plot.notExist",
        DomainError::UnknownNation(_) => "towns.cmd.err.nation.notExist",
        DomainError::UnknownResident(_) => "towns.cmd.err.resident.notExist",
    }
}

type Handler = fn(&mut CommandContext<'_>, &[&str]) -> Result<Reply, CommandError>;

struct Command {
    node: Option<&'static str>,
    usage: &'static str,
    handler: Handler,
}

/// Flat name → handler table. Names may span several words (`plot perm set`);
/// the longest registered prefix of the input wins.
pub struct CommandTable {
    commands: BTreeMap<&'static str, Command>,
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl CommandTable {
    pub fn empty() -> Self {
        Self {
            commands: BTreeMap::new(),
        }
    }

    pub fn standard() -> Self {
        let mut table = Self::empty();
        table.register("new", None, "new <name>", cmd_new);
        table.register("info", None, "info [town]", cmd_info);
        table.register("select", None, "select <town>", cmd_select);
        table.register("leave", Some("towns.cmd.resident.leave"), "leave", cmd_leave);
        table.register("claim", Some("towns.cmd.assistant.claim"), "claim", cmd_claim);
        table.register("unclaim", Some("towns.cmd.assistant.unclaim"), "unclaim", cmd_unclaim);
        table.register("add", Some("towns.cmd.assistant.add"), "add <resident>", cmd_add);
        table.register("remove", Some("towns.cmd.assistant.remove"), "remove <resident>", cmd_remove);
        table.register(
            "rank set",
            Some("towns.cmd.coowner.rank.set"),
            "rank set <resident> <rank>",
            cmd_rank_set,
        );
        table.register(
            "perm set",
            Some("towns.cmd.assistant.perm.set"),
            "perm set <flag> <value>",
            cmd_perm_set,
        );
        table.register(
            "plot new",
            Some("towns.cmd.assistant.plot.new"),
            "plot new <name> <x1> <y1> <z1> <x2> <y2> <z2>",
            cmd_plot_new,
        );
        table.register(
            "plot delete",
            Some("towns.cmd.assistant.plot.delete"),
            "plot delete",
            cmd_plot_delete,
        );
        table.register("plot add", None, "plot add <resident>", cmd_plot_add);
        table.register("plot perm set", None, "plot perm set <flag> <value>", cmd_plot_perm_set);
        table.register("disband", Some("towns.cmd.mayor.disband"), "disband", cmd_disband);
        table.register("nation new", Some("towns.cmd.mayor.nation"), "nation new <name>", cmd_nation_new);
        table
    }

    /// `node`, when set, must be held through the sender's rank in their
    /// selected town.
    pub fn register(&mut self, name: &'static str, node: Option<&'static str>, usage: &'static str, handler: Handler) {
        self.commands.insert(
            name,
            Command {
                node,
                usage,
                handler,
            },
        );
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.commands.keys().copied()
    }

    pub fn dispatch(&self, ctx: &mut CommandContext<'_>, line: &str) -> Result<Reply, CommandError> {
        let words: Vec<&str> = line.trim().trim_start_matches('/').split_whitespace().collect();
        let (name, command, args) = (1..=words.len().min(3))
            .rev()
            .find_map(|len| {
                let name = words[..len].join(" ").to_ascii_lowercase();
                self.commands
                    .get_key_value(name.as_str())
                    .map(|(name, command)| (*name, command, &words[len..]))
            })
            .ok_or_else(|| CommandError::Unknown(words.first().copied().unwrap_or_default().to_string()))?;

        if let Some(node) = command.node {
            let town = selected_town(ctx)?;
            if !ctx.universe.has_town_node(town, ctx.principal, node) {
                return Err(CommandError::Permission(node));
            }
        }
        let reply = (command.handler)(ctx, args).map_err(|err| match err {
            CommandError::MissingArgument => CommandError::Usage(command.usage),
            other => other,
        })?;
        info!(target: "towns", "{} ran '{}'", ctx.principal, name);
        Ok(reply)
    }
}

fn arg<'a>(args: &[&'a str], index: usize) -> Result<&'a str, CommandError> {
    args.get(index).copied().ok_or(CommandError::MissingArgument)
}

fn int_arg(args: &[&str], index: usize) -> Result<i32, CommandError> {
    let raw = arg(args, index)?;
    raw.parse()
        .map_err(|_| CommandError::InvalidArgument(raw.to_string()))
}

fn selected_town(ctx: &CommandContext<'_>) -> Result<TownId, CommandError> {
    ctx.universe
        .resident(ctx.principal)
        .and_then(|resident| resident.selected_town())
        .ok_or(CommandError::NoTown)
}

fn resident_named(ctx: &CommandContext<'_>, name: &str) -> Result<Uuid, CommandError> {
    ctx.universe
        .resident_by_name(name)
        .map(|resident| resident.uuid)
        .ok_or_else(|| CommandError::UnknownResident(name.to_string()))
}

fn flag_args(args: &[&str]) -> Result<(FlagType, FlagValue), CommandError> {
    let raw_flag = arg(args, 0)?;
    let raw_value = arg(args, 1)?;
    let flag: FlagType = raw_flag
        .parse()
        .map_err(|_| CommandError::InvalidArgument(raw_flag.to_string()))?;
    let value = flag
        .parse_value(raw_value)
        .ok_or_else(|| CommandError::InvalidArgument(raw_value.to_string()))?;
    Ok((flag, value))
}

/// The plot under the sender, which they must own or be able to bypass.
fn managed_plot(ctx: &CommandContext<'_>) -> Result<PlotId, CommandError> {
    let plot: &Plot = ctx
        .universe
        .plot_at(ctx.location.floored())
        .ok_or(CommandError::NoPlot)?;
    if !plot.is_owner(ctx.principal)
        && !ctx
            .universe
            .has_town_node(plot.town, ctx.principal, NODE_PLOT_BYPASS)
    {
        return Err(CommandError::Permission(NODE_PLOT_BYPASS));
    }
    Ok(plot.id)
}

fn cmd_new(ctx: &mut CommandContext<'_>, args: &[&str]) -> Result<Reply, CommandError> {
    let name = arg(args, 0)?;
    let chunk = ctx.location.floored().chunk();
    ctx.universe.new_town(name, ctx.principal, chunk)?;
    Ok(Reply::new("towns.notification.town.created", vec![name.to_string()]))
}

fn cmd_info(ctx: &mut CommandContext<'_>, args: &[&str]) -> Result<Reply, CommandError> {
    let town = match args.first() {
        Some(name) => ctx
            .universe
            .town_by_name(name)
            .ok_or_else(|| CommandError::UnknownTown(name.to_string()))?,
        None => {
            let id = selected_town(ctx)?;
            ctx.universe
                .town(id)
                .ok_or_else(|| CommandError::UnknownTown(format!("{id:?}")))?
        }
    };
    Ok(Reply::new(
        "towns.notification.town.info",
        vec![
            town.name.clone(),
            town.resident_count().to_string(),
            format!("{}/{}", town.block_count(), ctx.universe.block_quota(town)),
            town.plots().count().to_string(),
        ],
    ))
}

fn cmd_select(ctx: &mut CommandContext<'_>, args: &[&str]) -> Result<Reply, CommandError> {
    let name = arg(args, 0)?;
    let town = ctx
        .universe
        .town_by_name(name)
        .map(|town| town.id)
        .ok_or_else(|| CommandError::UnknownTown(name.to_string()))?;
    ctx.universe.select_town(ctx.principal, town)?;
    Ok(Reply::new("towns.notification.town.selected", vec![name.to_string()]))
}

fn cmd_leave(ctx: &mut CommandContext<'_>, _args: &[&str]) -> Result<Reply, CommandError> {
    let town = selected_town(ctx)?;
    ctx.universe.remove_resident(town, ctx.principal)?;
    Ok(Reply::new("towns.notification.town.left", Vec::new()))
}

fn cmd_claim(ctx: &mut CommandContext<'_>, _args: &[&str]) -> Result<Reply, CommandError> {
    let town = selected_town(ctx)?;
    let chunk = ctx.location.floored().chunk();
    let key = if ctx.universe.claim_block(town, chunk)? {
        "towns.notification.block.claimed"
    } else {
        "towns.notification.block.alreadyOwned"
    };
    Ok(Reply::new(key, vec![chunk.to_string()]))
}

fn cmd_unclaim(ctx: &mut CommandContext<'_>, _args: &[&str]) -> Result<Reply, CommandError> {
    let town = selected_town(ctx)?;
    let chunk = ctx.location.floored().chunk();
    ctx.universe.unclaim_block(town, chunk)?;
    Ok(Reply::new("towns.notification.block.unclaimed", vec![chunk.to_string()]))
}

fn cmd_add(ctx: &mut CommandContext<'_>, args: &[&str]) -> Result<Reply, CommandError> {
    let name = arg(args, 0)?;
    let resident = resident_named(ctx, name)?;
    let town = selected_town(ctx)?;
    ctx.universe.add_resident(town, resident, TownRank::Resident)?;
    Ok(Reply::new("towns.notification.town.resident.added", vec![name.to_string()]))
}

fn cmd_remove(ctx: &mut CommandContext<'_>, args: &[&str]) -> Result<Reply, CommandError> {
    let name = arg(args, 0)?;
    let resident = resident_named(ctx, name)?;
    let town = selected_town(ctx)?;
    ctx.universe.remove_resident(town, resident)?;
    Ok(Reply::new("towns.notification.town.resident.removed", vec![name.to_string()]))
}

fn cmd_rank_set(ctx: &mut CommandContext<'_>, args: &[&str]) -> Result<Reply, CommandError> {
    let name = arg(args, 0)?;
    let raw_rank = arg(args, 1)?;
    let rank: TownRank = raw_rank
        .parse()
        .map_err(|_| CommandError::InvalidArgument(raw_rank.to_string()))?;
    let resident = resident_named(ctx, name)?;
    let town = selected_town(ctx)?;
    let entry = ctx.universe.town(town).ok_or(CommandError::NoTown)?;
    let own = entry.rank_of(ctx.principal).ok_or(CommandError::NoTown)?;
    if rank > own {
        return Err(CommandError::RankTooHigh(rank));
    }
    // Nobody may change the rank of someone above them.
    if let Some(current) = entry.rank_of(resident) {
        if current > own {
            return Err(CommandError::RankTooHigh(current));
        }
    }
    ctx.universe.set_rank(town, resident, rank)?;
    Ok(Reply::new(
        "towns.notification.town.rank.set",
        vec![name.to_string(), rank.to_string()],
    ))
}

fn cmd_perm_set(ctx: &mut CommandContext<'_>, args: &[&str]) -> Result<Reply, CommandError> {
    let (flag, value) = flag_args(args)?;
    let town = selected_town(ctx)?;
    ctx.universe.set_town_flag(town, flag, value)?;
    Ok(Reply::new(
        "towns.notification.town.perm.set.success",
        vec![flag.to_string(), value.to_string()],
    ))
}

fn cmd_plot_new(ctx: &mut CommandContext<'_>, args: &[&str]) -> Result<Reply, CommandError> {
    let name = arg(args, 0)?;
    let mut corners = [0i32; 6];
    for (index, corner) in corners.iter_mut().enumerate() {
        *corner = int_arg(args, index + 1)?;
    }
    let [x1, y1, z1, x2, y2, z2] = corners;
    let volume = Volume::new(ctx.location.dim, x1, y1, z1, x2, y2, z2);
    let town = selected_town(ctx)?;
    ctx.universe.create_plot(town, name, volume, &[ctx.principal])?;
    Ok(Reply::new(
        "towns.notification.plot.created",
        vec![name.to_string(), volume.to_string()],
    ))
}

fn cmd_plot_delete(ctx: &mut CommandContext<'_>, _args: &[&str]) -> Result<Reply, CommandError> {
    let town = selected_town(ctx)?;
    let plot = ctx
        .universe
        .plot_at(ctx.location.floored())
        .filter(|plot| plot.town == town)
        .ok_or(CommandError::NoPlot)?;
    let (id, name) = (plot.id, plot.name.clone());
    ctx.universe.delete_plot(id)?;
    Ok(Reply::new("towns.notification.plot.deleted", vec![name]))
}

fn cmd_plot_add(ctx: &mut CommandContext<'_>, args: &[&str]) -> Result<Reply, CommandError> {
    let name = arg(args, 0)?;
    let resident = resident_named(ctx, name)?;
    let plot = managed_plot(ctx)?;
    ctx.universe.add_plot_owner(plot, resident)?;
    Ok(Reply::new("towns.notification.plot.owner.added", vec![name.to_string()]))
}

fn cmd_plot_perm_set(ctx: &mut CommandContext<'_>, args: &[&str]) -> Result<Reply, CommandError> {
    let (flag, value) = flag_args(args)?;
    let plot = managed_plot(ctx)?;
    ctx.universe.set_plot_flag(plot, flag, value)?;
    Ok(Reply::new(
        "towns.notification.plot.perm.set.success",
        vec![flag.to_string(), value.to_string()],
    ))
}

fn cmd_disband(ctx: &mut CommandContext<'_>, _args: &[&str]) -> Result<Reply, CommandError> {
    let town = selected_town(ctx)?;
    let name = ctx
        .universe
        .town(town)
        .map(|town| town.name.clone())
        .unwrap_or_default();
    ctx.universe.disband_town(town)?;
    Ok(Reply::new("towns.notification.town.disbanded", vec![name]))
}

fn cmd_nation_new(ctx: &mut CommandContext<'_>, args: &[&str]) -> Result<Reply, CommandError> {
    let name = arg(args, 0)?;
    let town = selected_town(ctx)?;
    ctx.universe.new_nation(name, town)?;
    let capital = ctx
        .universe
        .town(town)
        .map(|town| town.name.clone())
        .unwrap_or_default();
    Ok(Reply::new("towns.notification.nation.created", vec![name.to_string(), capital]))
}
