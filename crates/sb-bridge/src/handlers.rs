//! Handlers for every client message type.

use std::path::PathBuf;
use std::sync::Arc;

use sb_core::types::LaunchKind;
use sb_session::CreateRequest;

use crate::directives;
use crate::error::GatewayError;
use crate::gateway::{handler_fn, Gateway, RequestContext};
use crate::orchestrator::Orchestrator;
use crate::protocol::{
    kind, OrchestratorCommand, ServerMessage, TerminalCommand, TerminalCreate, TerminalDestroy,
    TerminalInput, TerminalLogs, TerminalResize,
};

const DEFAULT_LOG_LIMIT: usize = 100;

pub fn register_all(gateway: &mut Gateway, orchestrator: Arc<Orchestrator>) {
    let orch = orchestrator.clone();
    gateway.register_handler(
        kind::TERMINAL_CREATE,
        handler_fn(move |ctx| terminal_create(orch.clone(), ctx)),
    );
    let orch = orchestrator.clone();
    gateway.register_handler(
        kind::TERMINAL_INPUT,
        handler_fn(move |ctx| terminal_input(orch.clone(), ctx)),
    );
    let orch = orchestrator.clone();
    gateway.register_handler(
        kind::TERMINAL_RESIZE,
        handler_fn(move |ctx| terminal_resize(orch.clone(), ctx)),
    );
    let orch = orchestrator.clone();
    gateway.register_handler(
        kind::TERMINAL_COMMAND,
        handler_fn(move |ctx| terminal_command(orch.clone(), ctx)),
    );
    let orch = orchestrator.clone();
    gateway.register_handler(
        kind::TERMINAL_DESTROY,
        handler_fn(move |ctx| terminal_destroy(orch.clone(), ctx)),
    );
    let orch = orchestrator.clone();
    gateway.register_handler(
        kind::TERMINAL_LIST,
        handler_fn(move |ctx| terminal_list(orch.clone(), ctx)),
    );
    let orch = orchestrator.clone();
    gateway.register_handler(
        kind::TERMINAL_LOGS,
        handler_fn(move |ctx| terminal_logs(orch.clone(), ctx)),
    );
    let orch = orchestrator.clone();
    gateway.register_handler(
        kind::ORCHESTRATOR_INIT,
        handler_fn(move |ctx| orchestrator_init(orch.clone(), ctx)),
    );
    let orch = orchestrator;
    gateway.register_handler(
        kind::ORCHESTRATOR_COMMAND,
        handler_fn(move |ctx| orchestrator_command(orch.clone(), ctx)),
    );
}

type HandlerResult = crate::error::Result<()>;

async fn terminal_create(orch: Arc<Orchestrator>, ctx: RequestContext) -> HandlerResult {
    let req: TerminalCreate = ctx.parse()?;
    let kind = match req.agent_type.as_deref() {
        Some(t) => t.parse::<LaunchKind>().map_err(GatewayError::InvalidPayload)?,
        None => LaunchKind::Shell,
    };
    let client = ctx.client.id();
    let create = CreateRequest {
        name: req.agent_name,
        kind,
        directory: req.directory.map(PathBuf::from),
        project: req.project,
        mcp_servers: req.mcp_servers,
        owner: Some(client),
        control: req.is_orchestrator,
        ..CreateRequest::default()
    };
    let reply = match orch.manager().create(create) {
        Ok(created) => {
            if req.is_orchestrator {
                orch.bind_control(client, created.id);
            }
            ServerMessage::TerminalCreated {
                id: req.id,
                success: true,
                terminal_id: Some(created.id.to_string()),
                name: Some(created.name),
                data: created.banner,
                error: None,
            }
        }
        Err(e) => ServerMessage::TerminalCreated {
            id: req.id,
            success: false,
            terminal_id: None,
            name: None,
            data: None,
            error: Some(e.to_string()),
        },
    };
    ctx.reply(reply);
    Ok(())
}

async fn terminal_input(orch: Arc<Orchestrator>, ctx: RequestContext) -> HandlerResult {
    let req: TerminalInput = ctx.parse()?;
    let manager = orch.manager();
    let id = manager.resolve(&req.terminal_id)?;
    if manager.get(id)?.control {
        orch.intercept(ctx.client.id(), id, &req.data)?;
    } else {
        manager.write(id, req.data.as_bytes())?;
    }
    Ok(())
}

async fn terminal_resize(orch: Arc<Orchestrator>, ctx: RequestContext) -> HandlerResult {
    let req: TerminalResize = ctx.parse()?;
    if req.cols == 0 || req.rows == 0 {
        return Err(GatewayError::InvalidPayload(
            "cols and rows must be non-zero".into(),
        ));
    }
    let manager = orch.manager();
    let id = manager.resolve(&req.terminal_id)?;
    manager.resize(id, req.cols, req.rows)?;
    Ok(())
}

async fn terminal_command(orch: Arc<Orchestrator>, ctx: RequestContext) -> HandlerResult {
    let req: TerminalCommand = ctx.parse()?;
    let manager = orch.manager();
    let outcome = manager.resolve(&req.terminal_id).map_err(GatewayError::from).and_then(|id| {
        if directives::is_directive(&req.command) {
            orch.run_in_stream(ctx.client.id(), id, req.command.trim());
            Ok(())
        } else if manager.write(id, format!("{}\r", req.command).as_bytes())? {
            Ok(())
        } else {
            Err(GatewayError::Directive(format!(
                "terminal {} has exited",
                req.terminal_id
            )))
        }
    });
    ctx.reply(ServerMessage::CommandExecuted {
        id: req.id,
        terminal_id: req.terminal_id,
        success: outcome.is_ok(),
        error: outcome.err().map(|e| e.to_string()),
    });
    Ok(())
}

async fn terminal_destroy(orch: Arc<Orchestrator>, ctx: RequestContext) -> HandlerResult {
    let req: TerminalDestroy = ctx.parse()?;
    let outcome = orch.manager().destroy_by_key(&req.terminal_id);
    ctx.reply(ServerMessage::TerminalDestroyed {
        id: req.id,
        terminal_id: req.terminal_id,
        success: outcome.is_ok(),
        error: outcome.err().map(|e| e.to_string()),
    });
    Ok(())
}

async fn terminal_list(orch: Arc<Orchestrator>, ctx: RequestContext) -> HandlerResult {
    ctx.reply(ServerMessage::TerminalList {
        terminals: orch.manager().list(),
    });
    Ok(())
}

async fn terminal_logs(orch: Arc<Orchestrator>, ctx: RequestContext) -> HandlerResult {
    let req: TerminalLogs = ctx.parse()?;
    let manager = orch.manager();
    let limit = req.limit.unwrap_or(DEFAULT_LOG_LIMIT);
    let reply = match manager
        .resolve(&req.terminal_id)
        .and_then(|id| manager.logs(id, limit))
    {
        Ok(entries) => ServerMessage::TerminalLogs {
            id: req.id,
            terminal_id: req.terminal_id,
            success: true,
            entries,
            error: None,
        },
        Err(e) => ServerMessage::TerminalLogs {
            id: req.id,
            terminal_id: req.terminal_id,
            success: false,
            entries: Vec::new(),
            error: Some(e.to_string()),
        },
    };
    ctx.reply(reply);
    Ok(())
}

async fn orchestrator_init(orch: Arc<Orchestrator>, ctx: RequestContext) -> HandlerResult {
    orch.init(ctx.client.id())?;
    Ok(())
}

async fn orchestrator_command(orch: Arc<Orchestrator>, ctx: RequestContext) -> HandlerResult {
    let req: OrchestratorCommand = ctx.parse()?;
    let client = ctx.client.id();
    let control = orch.control_for(client).ok_or_else(|| {
        GatewayError::InvalidPayload("no orchestrator session; send orchestrator-init first".into())
    })?;

    if req.subtype.as_deref() == Some(kind::TERMINAL_INPUT) {
        let data = req.data.ok_or_else(|| {
            GatewayError::InvalidPayload("terminal-input subtype requires data".into())
        })?;
        return orch.intercept(client, control, &data);
    }

    let command = req
        .command
        .ok_or_else(|| GatewayError::InvalidPayload("command is required".into()))?;
    if directives::is_directive(&command) {
        orch.run_in_stream(client, control, command.trim());
    } else {
        orch.manager()
            .write(control, format!("{command}\r").as_bytes())?;
    }
    Ok(())
}
