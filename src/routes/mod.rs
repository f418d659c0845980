use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, patch, post, put},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::{auth::AuthenticatedUser, state::AppState};

pub mod admin;
pub mod auth;
pub mod bookmarks;
pub mod campaigns;
pub mod cron;
pub mod email;
pub mod files;
pub mod health;
pub mod messages;
pub mod notifications;
pub mod profiles;
pub mod proposals;
pub mod tasks;

const MAX_BODY_BYTES: usize = 12 * 1024 * 1024;

pub fn create_router(state: AppState) -> Router<()> {
    let cors = build_cors(state.config.cors_allowed_origin.as_deref());

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me))
        .route("/password", post(auth::change_password));

    let profile_routes = Router::new()
        .route("/me", get(profiles::get_my_profile))
        .route("/me/steps/:step", put(profiles::save_step))
        .route(
            "/me/draft",
            put(profiles::save_draft).delete(profiles::clear_draft),
        )
        .route("/me/complete", post(profiles::complete_profile));

    let directory_routes = Router::new()
        .route("/api/experts", get(profiles::list_experts))
        .route("/api/experts/:user_id", get(profiles::get_expert))
        .route("/api/organizations/:user_id", get(profiles::get_organization));

    let campaign_routes = Router::new()
        .route(
            "/",
            get(campaigns::list_campaigns).post(campaigns::create_campaign),
        )
        .route(
            "/:id",
            get(campaigns::get_campaign)
                .patch(campaigns::update_campaign)
                .delete(campaigns::delete_campaign),
        )
        .route("/:id/status", post(campaigns::change_status))
        .route(
            "/:id/proposals",
            get(proposals::list_campaign_proposals).post(proposals::submit_proposal),
        )
        .route("/:id/proposals/export", get(proposals::export_campaign_proposals))
        .route(
            "/:id/messages",
            get(messages::list_messages).post(messages::send_message),
        )
        .route("/:id/messages/stream", get(messages::stream_messages))
        .route(
            "/:id/tasks",
            get(tasks::list_tasks).post(tasks::create_task),
        );

    let proposal_routes = Router::new()
        .route("/mine", get(proposals::list_my_proposals))
        .route("/:id", get(proposals::get_proposal))
        .route("/:id/withdraw", post(proposals::withdraw_proposal))
        .route("/:id/reject", post(proposals::reject_proposal))
        .route("/:id/accept", post(proposals::accept_proposal));

    let message_routes = Router::new().route("/:id/read", post(messages::mark_message_read));

    let notification_routes = Router::new()
        .route("/", get(notifications::list_notifications))
        .route("/unread-count", get(notifications::unread_count))
        .route("/read-all", post(notifications::mark_all_read))
        .route("/stream", get(notifications::stream_notifications))
        .route("/:id", delete(notifications::delete_notification))
        .route("/:id/read", post(notifications::mark_read));

    let bookmark_routes = Router::new()
        .route(
            "/",
            get(bookmarks::list_bookmarks).post(bookmarks::add_bookmark),
        )
        .route("/:kind/:target_id", delete(bookmarks::remove_bookmark));

    let task_routes = Router::new().route(
        "/:id",
        patch(tasks::update_task).delete(tasks::delete_task),
    );

    let file_routes = Router::new()
        .route("/", get(files::list_files).post(files::upload_file))
        .route("/:id", delete(files::delete_file))
        .route("/:id/download", get(files::download_file));

    let admin_routes = Router::new()
        .route("/logs", get(admin::list_logs))
        .route("/users", get(admin::list_users))
        .route(
            "/users/:id",
            patch(admin::update_user).delete(admin::delete_user),
        )
        .route("/proposals", get(admin::list_proposals))
        .route("/proposals/:id", patch(admin::override_proposal))
        .route("/analytics", get(admin::analytics));

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/profiles", profile_routes)
        .merge(directory_routes)
        .nest("/api/campaigns", campaign_routes)
        .nest("/api/proposals", proposal_routes)
        .nest("/api/messages", message_routes)
        .nest("/api/notifications", notification_routes)
        .nest("/api/bookmarks", bookmark_routes)
        .nest("/api/tasks", task_routes)
        .nest("/api/files", file_routes)
        .nest("/api/admin", admin_routes)
        .route("/api/email/send", post(email::send_email))
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    Router::new()
        .merge(protected_routes)
        .nest("/api/auth", auth_routes)
        .route("/api/downloads/:token", get(files::download_with_token))
        .route("/api/cron/reminders", post(cron::send_reminders))
        .route("/api/public/stats", get(health::public_stats))
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
}

fn build_cors(allowed: Option<&str>) -> CorsLayer {
    let allow_origin = match allowed {
        Some(origins) => {
            let headers: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|value| {
                    let trimmed = value.trim();
                    if trimmed.is_empty() {
                        return None;
                    }
                    match trimmed.parse::<HeaderValue>() {
                        Ok(origin) => Some(origin),
                        Err(_) => {
                            tracing::warn!(origin = %trimmed, "ignoring invalid CORS origin");
                            None
                        }
                    }
                })
                .collect();
            AllowOrigin::list(headers)
        }
        None => AllowOrigin::mirror_request(),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(tower_http::cors::AllowMethods::mirror_request())
        .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
        .allow_credentials(true)
}
