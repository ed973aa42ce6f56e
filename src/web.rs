//! Server-rendered account pages under `/web/`.
//!
//! A small HTML front end over the same services the JSON API uses. The
//! session is an access token carried in the `caresync_session` cookie;
//! pages that need a session redirect to the login form without one.

use std::str::FromStr;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Form, Router};
use chrono::{NaiveDate, Utc};
use rusqlite::Connection;
use serde::Deserialize;
use tower_http::set_header::SetResponseHeaderLayer;
use uuid::Uuid;

use crate::accounts::{self, Registration, UserChanges};
use crate::api::middleware::auth::session_cookie;
use crate::api::types::{ApiContext, SESSION_COOKIE};
use crate::auth::{authenticate, AuthError, Identity, TokenType};
use crate::db::{open_connection, repository, DatabaseError};
use crate::family::{self, FamilyMemberChanges};
use crate::medications;
use crate::models::enums::{BloodType, Gender, Relationship, Role};
use crate::models::{DoctorProfile, FamilyMember, HealthProfile, PatientProfile, User};
use crate::prescriptions;
use crate::profiles::{self, DoctorProfileChanges, HealthProfileChanges, PatientProfileChanges};
use crate::validation::{DomainError, FieldErrors};

const LOGIN_PATH: &str = "/web/login";
const DASHBOARD_PATH: &str = "/web/dashboard";
const PROFILE_PATH: &str = "/web/profile";
const HEALTH_PATH: &str = "/web/health/profile";
const FAMILY_PATH: &str = "/web/family-members";

pub fn router(ctx: ApiContext) -> Router {
    Router::new()
        .route("/", get(|| async { Redirect::to(DASHBOARD_PATH) }))
        .route("/login", get(login_page).post(login))
        .route("/logout", get(logout).post(logout))
        .route("/signup", get(signup_page).post(signup))
        .route("/dashboard", get(dashboard))
        .route("/profile", get(profile))
        .route("/profile/update", get(account_page).post(update_account))
        .route("/profile/patient/update", get(patient_page).post(update_patient))
        .route("/profile/doctor/update", get(doctor_page).post(update_doctor))
        .route("/health/profile", get(health_profile))
        .route("/health/profile/edit", get(health_page).post(update_health))
        .route("/family-members", get(family_list))
        .route("/family-members/add", get(family_add_page).post(add_family_member))
        .route("/family-members/:id/edit", get(family_edit_page).post(edit_family_member))
        .route("/family-members/:id/delete", get(family_delete_page).post(delete_family_member))
        .with_state(ctx)
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
}

// ═══════════════════════════════════════════════════════════
// Errors and session
// ═══════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error)]
enum PageError {
    #[error("login required")]
    LoginRequired,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error(transparent)]
    Domain(DomainError),
}

impl From<DomainError> for PageError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::NotFound(entity) => PageError::NotFound(entity),
            DomainError::Unauthenticated => PageError::LoginRequired,
            other => PageError::Domain(other),
        }
    }
}

impl From<DatabaseError> for PageError {
    fn from(err: DatabaseError) -> Self {
        PageError::Domain(err.into())
    }
}

impl From<AuthError> for PageError {
    fn from(err: AuthError) -> Self {
        PageError::Domain(err.into())
    }
}

impl IntoResponse for PageError {
    fn into_response(self) -> Response {
        match self {
            PageError::LoginRequired => {
                ([(header::SET_COOKIE, expired_cookie())], Redirect::to(LOGIN_PATH)).into_response()
            }
            PageError::NotFound(entity) => (
                StatusCode::NOT_FOUND,
                page(None, "Not found", &format!("<p>{} not found.</p>", escape(entity))),
            )
                .into_response(),
            PageError::Domain(DomainError::Forbidden(message)) => (
                StatusCode::FORBIDDEN,
                page(None, "Forbidden", &format!("<p>{}</p>", escape(&message))),
            )
                .into_response(),
            PageError::Domain(err) => {
                tracing::error!(error = %err, "page request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    page(None, "Error", "<p>An internal error occurred.</p>"),
                )
                    .into_response()
            }
        }
    }
}

type PageResult = Result<Response, PageError>;

/// The signed-in identity behind the session cookie.
fn session(ctx: &ApiContext, headers: &HeaderMap) -> Result<Identity, PageError> {
    let token = session_cookie(headers).ok_or(PageError::LoginRequired)?;
    ctx.tokens.verify_access(&token).map_err(|e| {
        tracing::debug!(error = %e, "session cookie rejected");
        PageError::LoginRequired
    })
}

fn open(ctx: &ApiContext) -> Result<Connection, PageError> {
    Ok(open_connection(&ctx.config.db_path)?)
}

fn session_set_cookie(token: &str, max_age: i64) -> String {
    format!("{SESSION_COOKIE}={token}; Path=/web; HttpOnly; SameSite=Lax; Max-Age={max_age}")
}

fn expired_cookie() -> String {
    format!("{SESSION_COOKIE}=; Path=/web; HttpOnly; SameSite=Lax; Max-Age=0")
}

/// Start a session for `user` and send them to the dashboard.
fn signed_in(ctx: &ApiContext, user: &User) -> PageResult {
    let identity = Identity::from(user);
    let token = ctx.tokens.issue(&identity, TokenType::Access, Utc::now())?;
    let cookie = session_set_cookie(&token, ctx.config.access_ttl_secs);
    Ok(([(header::SET_COOKIE, cookie)], Redirect::to(DASHBOARD_PATH)).into_response())
}

/// Field errors go back to the form; anything else is a page failure.
fn form_outcome<T>(result: Result<T, DomainError>) -> Result<Result<T, FieldErrors>, PageError> {
    match result {
        Ok(value) => Ok(Ok(value)),
        Err(DomainError::Validation(errors)) => Ok(Err(errors)),
        Err(other) => Err(other.into()),
    }
}

// ═══════════════════════════════════════════════════════════
// Form parsing
// ═══════════════════════════════════════════════════════════

/// Blank means absent; anything else must parse.
fn parse_opt<T: FromStr>(raw: &str, field: &str, message: &str, errors: &mut FieldErrors) -> Option<T> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            errors.add(field, message);
            None
        }
    }
}

fn parse_date(raw: &str, field: &str, errors: &mut FieldErrors) -> Option<NaiveDate> {
    parse_opt(raw, field, "Enter a valid date.", errors)
}

fn parse_choice<T: FromStr>(raw: &str, field: &str, errors: &mut FieldErrors) -> Option<T> {
    parse_opt(raw, field, "Select a valid choice.", errors)
}

fn blank_to_none(raw: &str) -> Option<String> {
    let raw = raw.trim();
    (!raw.is_empty()).then(|| raw.to_string())
}

// ═══════════════════════════════════════════════════════════
// HTML rendering
// ═══════════════════════════════════════════════════════════

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn page(identity: Option<&Identity>, title: &str, content: &str) -> Html<String> {
    let nav = match identity {
        Some(id) => format!(
            r#"<nav><a href="/web/dashboard">Dashboard</a> <a href="/web/profile">Profile</a> <a href="/web/health/profile">Health</a> <a href="/web/family-members">Family</a>
<form class="inline" method="post" action="/web/logout"><button type="submit">Log out {user}</button></form></nav>"#,
            user = escape(&id.username),
        ),
        None => r#"<nav><a href="/web/login">Log in</a> <a href="/web/signup">Sign up</a></nav>"#.to_string(),
    };

    let html = format!(
        r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title} | CareSync</title>
<style>
  body {{ font-family: system-ui, sans-serif; max-width: 48rem; margin: 2rem auto; padding: 0 1rem; color: #1f2933; }}
  nav {{ display: flex; gap: 1rem; align-items: center; border-bottom: 1px solid #d9e2ec; padding-bottom: 0.75rem; }}
  form.inline {{ display: inline; margin-left: auto; }}
  label {{ display: block; margin-top: 0.75rem; font-weight: 600; }}
  input, select, textarea {{ width: 100%; padding: 0.4rem; box-sizing: border-box; }}
  input[type=checkbox] {{ width: auto; }}
  button {{ margin-top: 1rem; padding: 0.4rem 1rem; }}
  .error {{ color: #c53030; margin: 0.25rem 0; }}
  table {{ width: 100%; border-collapse: collapse; }}
  td, th {{ text-align: left; padding: 0.4rem; border-bottom: 1px solid #e4e7eb; }}
  dt {{ font-weight: 600; margin-top: 0.5rem; }}
</style>
</head>
<body>
{nav}
<main>
<h1>{title}</h1>
{content}
</main>
</body>
</html>"##,
        title = escape(title),
    );
    Html(html)
}

fn errors_for(errors: &FieldErrors, field: &str) -> String {
    errors
        .get(field)
        .map(|messages| {
            messages
                .iter()
                .map(|m| format!(r#"<p class="error">{}</p>"#, escape(m)))
                .collect()
        })
        .unwrap_or_default()
}

fn input(kind: &str, name: &str, label: &str, value: &str, errors: &FieldErrors) -> String {
    format!(
        r#"<label for="{name}">{label}</label><input type="{kind}" id="{name}" name="{name}" value="{value}">{errs}"#,
        value = escape(value),
        errs = errors_for(errors, name),
    )
}

fn text(name: &str, label: &str, value: &str, errors: &FieldErrors) -> String {
    input("text", name, label, value, errors)
}

fn textarea(name: &str, label: &str, value: &str, errors: &FieldErrors) -> String {
    format!(
        r#"<label for="{name}">{label}</label><textarea id="{name}" name="{name}" rows="3">{value}</textarea>{errs}"#,
        value = escape(value),
        errs = errors_for(errors, name),
    )
}

fn select(name: &str, label: &str, choices: &[&str], selected: &str, errors: &FieldErrors) -> String {
    let options: String = choices
        .iter()
        .map(|c| {
            let mark = if *c == selected { " selected" } else { "" };
            format!(r#"<option value="{v}"{mark}>{v}</option>"#, v = escape(c))
        })
        .collect();
    format!(
        r#"<label for="{name}">{label}</label><select id="{name}" name="{name}"><option value="">---------</option>{options}</select>{errs}"#,
        errs = errors_for(errors, name),
    )
}

fn checkbox(name: &str, label: &str, checked: bool) -> String {
    let mark = if checked { " checked" } else { "" };
    format!(r#"<label><input type="checkbox" name="{name}" value="on"{mark}> {label}</label>"#)
}

fn form(action: &str, fields: &str, submit: &str) -> String {
    format!(r#"<form method="post" action="{action}">{fields}<button type="submit">{submit}</button></form>"#)
}

fn details(rows: &[(&str, String)]) -> String {
    let body: String = rows
        .iter()
        .map(|(label, value)| {
            let value = if value.is_empty() { "-".to_string() } else { escape(value) };
            format!("<dt>{label}</dt><dd>{value}</dd>")
        })
        .collect();
    format!("<dl>{body}</dl>")
}

fn choices<T: Copy>(all: &[T], as_str: fn(&T) -> &'static str) -> Vec<&'static str> {
    all.iter().map(as_str).collect()
}

fn opt_display<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(ToString::to_string).unwrap_or_default()
}

fn ok_page(identity: &Identity, title: &str, content: &str) -> PageResult {
    Ok(page(Some(identity), title, content).into_response())
}

// ═══════════════════════════════════════════════════════════
// Login, logout, signup
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

fn login_content(form_data: &LoginForm, failed: bool) -> String {
    let none = FieldErrors::new();
    let notice = if failed {
        r#"<p class="error">Please enter a correct username and password.</p>"#
    } else {
        ""
    };
    let fields = format!(
        "{notice}{}{}",
        text("username", "Username", &form_data.username, &none),
        input("password", "password", "Password", "", &none),
    );
    form(LOGIN_PATH, &fields, "Log in")
}

async fn login_page(State(ctx): State<ApiContext>, headers: HeaderMap) -> Response {
    if session(&ctx, &headers).is_ok() {
        return Redirect::to(DASHBOARD_PATH).into_response();
    }
    page(None, "Log in", &login_content(&LoginForm::default(), false)).into_response()
}

async fn login(State(ctx): State<ApiContext>, Form(form_data): Form<LoginForm>) -> PageResult {
    let conn = open(&ctx)?;
    match authenticate(&conn, form_data.username.trim(), &form_data.password) {
        Ok(user) => {
            tracing::info!(user_id = %user.id, "web session started");
            signed_in(&ctx, &user)
        }
        Err(AuthError::InvalidCredentials) => {
            Ok(page(None, "Log in", &login_content(&form_data, true)).into_response())
        }
        Err(e) => Err(e.into()),
    }
}

async fn logout() -> Response {
    ([(header::SET_COOKIE, expired_cookie())], Redirect::to(LOGIN_PATH)).into_response()
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SignupForm {
    pub username: String,
    pub email: String,
    pub password: String,
    pub password2: String,
    pub user_type: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub date_of_birth: String,
}

impl SignupForm {
    fn render(&self, errors: &FieldErrors) -> String {
        let roles: Vec<&str> = Role::ALL
            .iter()
            .filter(|r| **r != Role::Admin)
            .map(|r| r.as_str())
            .collect();
        let none = FieldErrors::new();
        let fields = [
            text("username", "Username", &self.username, errors),
            input("email", "email", "Email", &self.email, errors),
            input("password", "password", "Password", "", errors),
            input("password", "password2", "Password confirmation", "", &none),
            select("user_type", "Account type", &roles, &self.user_type, errors),
            text("first_name", "First name", &self.first_name, errors),
            text("last_name", "Last name", &self.last_name, errors),
            text("phone", "Phone", &self.phone, errors),
            input("date", "date_of_birth", "Date of birth", &self.date_of_birth, errors),
        ]
        .concat();
        form("/web/signup", &fields, "Sign up")
    }

    fn registration(&self, errors: &mut FieldErrors) -> Option<Registration> {
        let role = parse_choice::<Role>(&self.user_type, "user_type", errors);
        if role.is_none() && self.user_type.trim().is_empty() {
            errors.add("user_type", "This field is required.");
        }
        let date_of_birth = parse_date(&self.date_of_birth, "date_of_birth", errors);
        Some(Registration {
            username: self.username.clone(),
            email: self.email.clone(),
            password: self.password.clone(),
            password2: self.password2.clone(),
            role: role?,
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            phone: self.phone.clone(),
            date_of_birth,
            address: String::new(),
            city: String::new(),
            state: String::new(),
            zip_code: String::new(),
        })
    }
}

async fn signup_page() -> Response {
    page(None, "Sign up", &SignupForm::default().render(&FieldErrors::new())).into_response()
}

async fn signup(State(ctx): State<ApiContext>, Form(form_data): Form<SignupForm>) -> PageResult {
    let mut errors = FieldErrors::new();
    let registration = form_data.registration(&mut errors);
    let registration = match registration {
        Some(reg) if errors.is_empty() => reg,
        _ => return Ok(page(None, "Sign up", &form_data.render(&errors)).into_response()),
    };

    let conn = open(&ctx)?;
    match form_outcome(accounts::register(&conn, None, registration))? {
        Ok(user) => signed_in(&ctx, &user),
        Err(errors) => Ok(page(None, "Sign up", &form_data.render(&errors)).into_response()),
    }
}

// ═══════════════════════════════════════════════════════════
// Dashboard and account profile
// ═══════════════════════════════════════════════════════════

async fn dashboard(State(ctx): State<ApiContext>, headers: HeaderMap) -> PageResult {
    let identity = session(&ctx, &headers)?;
    let conn = open(&ctx)?;
    let user = accounts::visible_user(&conn, &identity, &identity.user_id)?;

    let summary = match identity.role {
        Role::Patient => {
            let health = profiles::health_summary(&conn, &identity)?;
            let active = medications::list_patient_medications(&conn, &identity, &medications::active_filter())?;
            let contacts = family::list_family_members(&conn, &identity)?;
            details(&[
                ("Health profile completion", format!("{}%", health.completion_percentage)),
                ("BMI", health.bmi.map(|b| format!("{b:.1}")).unwrap_or_default()),
                ("Active medications", active.len().to_string()),
                ("Family contacts", contacts.len().to_string()),
            ])
        }
        Role::Doctor => {
            let profile = repository::get_doctor_profile_by_user(&conn, &identity.user_id)?;
            let written = prescriptions::list_prescriptions(&conn, &identity)?;
            details(&[
                (
                    "Specialization",
                    profile.as_ref().map(|p| p.specialization.clone()).unwrap_or_default(),
                ),
                (
                    "Accepting patients",
                    profile
                        .as_ref()
                        .map(|p| (if p.is_available { "Yes" } else { "No" }).to_string())
                        .unwrap_or_default(),
                ),
                ("Prescriptions", written.len().to_string()),
            ])
        }
        Role::Caregiver | Role::Admin => String::new(),
    };

    let content = format!(
        "<p>Welcome, {name}. You are signed in as a {role}.</p>{summary}",
        name = escape(&user.display_name()),
        role = identity.role,
    );
    ok_page(&identity, "Dashboard", &content)
}

async fn profile(State(ctx): State<ApiContext>, headers: HeaderMap) -> PageResult {
    let identity = session(&ctx, &headers)?;
    let conn = open(&ctx)?;
    let user = accounts::visible_user(&conn, &identity, &identity.user_id)?;

    let mut content = details(&[
        ("Username", user.username.clone()),
        ("Name", user.full_name()),
        ("Email", user.email.clone()),
        ("Phone", user.phone.clone()),
        ("Date of birth", opt_display(&user.date_of_birth)),
        ("Address", user.address.clone()),
        ("City", user.city.clone()),
        ("State", user.state.clone()),
        ("ZIP code", user.zip_code.clone()),
    ]);
    content.push_str(r#"<p><a href="/web/profile/update">Edit account</a></p>"#);

    if let Some(p) = repository::get_patient_profile_by_user(&conn, &user.id)? {
        content.push_str("<h2>Patient profile</h2>");
        content.push_str(&details(&[
            ("Blood type", opt_display(&p.blood_type)),
            ("Allergies", p.allergies),
            ("Chronic conditions", p.chronic_conditions),
            ("Emergency contact", p.emergency_contact_name),
            ("Emergency phone", p.emergency_contact_phone),
        ]));
        content.push_str(r#"<p><a href="/web/profile/patient/update">Edit patient profile</a></p>"#);
    }
    if let Some(d) = repository::get_doctor_profile_by_user(&conn, &user.id)? {
        content.push_str("<h2>Doctor profile</h2>");
        content.push_str(&details(&[
            ("Specialization", d.specialization),
            ("License number", d.license_number.unwrap_or_default()),
            ("Hospital", d.hospital_affiliation),
            ("Years of experience", opt_display(&d.years_of_experience)),
            ("Available days", d.available_days),
            ("Available hours", d.available_hours),
        ]));
        content.push_str(r#"<p><a href="/web/profile/doctor/update">Edit doctor profile</a></p>"#);
    }

    let contacts = family::list_family_members(&conn, &identity)?;
    content.push_str(&format!(
        r#"<h2>Family members</h2><p>{} listed. <a href="/web/family-members">Manage</a></p>"#,
        contacts.len()
    ));
    ok_page(&identity, "Profile", &content)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AccountForm {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub date_of_birth: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
}

impl AccountForm {
    fn from_user(user: &User) -> Self {
        Self {
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            phone: user.phone.clone(),
            date_of_birth: opt_display(&user.date_of_birth),
            address: user.address.clone(),
            city: user.city.clone(),
            state: user.state.clone(),
            zip_code: user.zip_code.clone(),
        }
    }

    fn render(&self, errors: &FieldErrors) -> String {
        let fields = [
            input("email", "email", "Email", &self.email, errors),
            text("first_name", "First name", &self.first_name, errors),
            text("last_name", "Last name", &self.last_name, errors),
            text("phone", "Phone", &self.phone, errors),
            input("date", "date_of_birth", "Date of birth", &self.date_of_birth, errors),
            text("address", "Address", &self.address, errors),
            text("city", "City", &self.city, errors),
            text("state", "State", &self.state, errors),
            text("zip_code", "ZIP code", &self.zip_code, errors),
        ]
        .concat();
        form("/web/profile/update", &fields, "Save")
    }

    fn changes(&self, errors: &mut FieldErrors) -> UserChanges {
        UserChanges {
            email: Some(self.email.clone()),
            first_name: Some(self.first_name.clone()),
            last_name: Some(self.last_name.clone()),
            phone: Some(self.phone.clone()),
            date_of_birth: Some(parse_date(&self.date_of_birth, "date_of_birth", errors)),
            address: Some(self.address.clone()),
            city: Some(self.city.clone()),
            state: Some(self.state.clone()),
            zip_code: Some(self.zip_code.clone()),
            profile_picture: None,
        }
    }
}

async fn account_page(State(ctx): State<ApiContext>, headers: HeaderMap) -> PageResult {
    let identity = session(&ctx, &headers)?;
    let conn = open(&ctx)?;
    let user = accounts::visible_user(&conn, &identity, &identity.user_id)?;
    ok_page(&identity, "Edit account", &AccountForm::from_user(&user).render(&FieldErrors::new()))
}

async fn update_account(
    State(ctx): State<ApiContext>,
    headers: HeaderMap,
    Form(form_data): Form<AccountForm>,
) -> PageResult {
    let identity = session(&ctx, &headers)?;
    let mut errors = FieldErrors::new();
    let changes = form_data.changes(&mut errors);
    if !errors.is_empty() {
        return ok_page(&identity, "Edit account", &form_data.render(&errors));
    }

    let conn = open(&ctx)?;
    let user = accounts::visible_user(&conn, &identity, &identity.user_id)?;
    match form_outcome(accounts::update_user(&conn, user, changes))? {
        Ok(_) => Ok(Redirect::to(PROFILE_PATH).into_response()),
        Err(errors) => ok_page(&identity, "Edit account", &form_data.render(&errors)),
    }
}

// ═══════════════════════════════════════════════════════════
// Role profiles
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PatientForm {
    pub blood_type: String,
    pub allergies: String,
    pub chronic_conditions: String,
    pub emergency_contact_name: String,
    pub emergency_contact_phone: String,
    pub emergency_contact_relationship: String,
}

impl PatientForm {
    fn from_profile(p: &PatientProfile) -> Self {
        Self {
            blood_type: opt_display(&p.blood_type),
            allergies: p.allergies.clone(),
            chronic_conditions: p.chronic_conditions.clone(),
            emergency_contact_name: p.emergency_contact_name.clone(),
            emergency_contact_phone: p.emergency_contact_phone.clone(),
            emergency_contact_relationship: p.emergency_contact_relationship.clone(),
        }
    }

    fn render(&self, errors: &FieldErrors) -> String {
        let blood_types = choices(BloodType::ALL, BloodType::as_str);
        let fields = [
            select("blood_type", "Blood type", &blood_types, &self.blood_type, errors),
            textarea("allergies", "Allergies", &self.allergies, errors),
            textarea("chronic_conditions", "Chronic conditions", &self.chronic_conditions, errors),
            text("emergency_contact_name", "Emergency contact name", &self.emergency_contact_name, errors),
            text("emergency_contact_phone", "Emergency contact phone", &self.emergency_contact_phone, errors),
            text(
                "emergency_contact_relationship",
                "Emergency contact relationship",
                &self.emergency_contact_relationship,
                errors,
            ),
        ]
        .concat();
        form("/web/profile/patient/update", &fields, "Save")
    }

    fn changes(&self, errors: &mut FieldErrors) -> PatientProfileChanges {
        PatientProfileChanges {
            blood_type: Some(parse_choice(&self.blood_type, "blood_type", errors)),
            allergies: Some(self.allergies.clone()),
            chronic_conditions: Some(self.chronic_conditions.clone()),
            emergency_contact_name: Some(self.emergency_contact_name.clone()),
            emergency_contact_phone: Some(self.emergency_contact_phone.clone()),
            emergency_contact_relationship: Some(self.emergency_contact_relationship.clone()),
        }
    }
}

fn own_patient_profile(conn: &Connection, identity: &Identity) -> Result<PatientProfile, PageError> {
    repository::get_patient_profile_by_user(conn, &identity.user_id)?.ok_or(PageError::NotFound("Patient profile"))
}

async fn patient_page(State(ctx): State<ApiContext>, headers: HeaderMap) -> PageResult {
    let identity = session(&ctx, &headers)?;
    let conn = open(&ctx)?;
    let profile = own_patient_profile(&conn, &identity)?;
    ok_page(
        &identity,
        "Edit patient profile",
        &PatientForm::from_profile(&profile).render(&FieldErrors::new()),
    )
}

async fn update_patient(
    State(ctx): State<ApiContext>,
    headers: HeaderMap,
    Form(form_data): Form<PatientForm>,
) -> PageResult {
    let identity = session(&ctx, &headers)?;
    let conn = open(&ctx)?;
    let profile = own_patient_profile(&conn, &identity)?;

    let mut errors = FieldErrors::new();
    let changes = form_data.changes(&mut errors);
    if !errors.is_empty() {
        return ok_page(&identity, "Edit patient profile", &form_data.render(&errors));
    }
    match form_outcome(profiles::update_patient_profile(&conn, profile, changes))? {
        Ok(_) => Ok(Redirect::to(PROFILE_PATH).into_response()),
        Err(errors) => ok_page(&identity, "Edit patient profile", &form_data.render(&errors)),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DoctorForm {
    pub specialization: String,
    pub license_number: String,
    pub hospital_affiliation: String,
    pub years_of_experience: String,
    pub consultation_fee: String,
    pub is_available: Option<String>,
    pub available_days: String,
    pub available_hours: String,
}

impl DoctorForm {
    fn from_profile(d: &DoctorProfile) -> Self {
        Self {
            specialization: d.specialization.clone(),
            license_number: d.license_number.clone().unwrap_or_default(),
            hospital_affiliation: d.hospital_affiliation.clone(),
            years_of_experience: opt_display(&d.years_of_experience),
            consultation_fee: opt_display(&d.consultation_fee),
            is_available: d.is_available.then(|| "on".to_string()),
            available_days: d.available_days.clone(),
            available_hours: d.available_hours.clone(),
        }
    }

    fn render(&self, errors: &FieldErrors) -> String {
        let fields = [
            text("specialization", "Specialization", &self.specialization, errors),
            text("license_number", "License number", &self.license_number, errors),
            text("hospital_affiliation", "Hospital affiliation", &self.hospital_affiliation, errors),
            input("number", "years_of_experience", "Years of experience", &self.years_of_experience, errors),
            input("number", "consultation_fee", "Consultation fee", &self.consultation_fee, errors),
            checkbox("is_available", "Accepting patients", self.is_available.is_some()),
            text("available_days", "Available days", &self.available_days, errors),
            text("available_hours", "Available hours", &self.available_hours, errors),
        ]
        .concat();
        form("/web/profile/doctor/update", &fields, "Save")
    }

    fn changes(&self, errors: &mut FieldErrors) -> DoctorProfileChanges {
        DoctorProfileChanges {
            specialization: Some(self.specialization.clone()),
            license_number: Some(blank_to_none(&self.license_number)),
            hospital_affiliation: Some(self.hospital_affiliation.clone()),
            years_of_experience: Some(parse_opt(
                &self.years_of_experience,
                "years_of_experience",
                "Enter a whole number.",
                errors,
            )),
            consultation_fee: Some(parse_opt(&self.consultation_fee, "consultation_fee", "Enter a number.", errors)),
            is_available: Some(self.is_available.is_some()),
            available_days: Some(self.available_days.clone()),
            available_hours: Some(self.available_hours.clone()),
        }
    }
}

fn own_doctor_profile(conn: &Connection, identity: &Identity) -> Result<DoctorProfile, PageError> {
    repository::get_doctor_profile_by_user(conn, &identity.user_id)?.ok_or(PageError::NotFound("Doctor profile"))
}

async fn doctor_page(State(ctx): State<ApiContext>, headers: HeaderMap) -> PageResult {
    let identity = session(&ctx, &headers)?;
    let conn = open(&ctx)?;
    let profile = own_doctor_profile(&conn, &identity)?;
    ok_page(
        &identity,
        "Edit doctor profile",
        &DoctorForm::from_profile(&profile).render(&FieldErrors::new()),
    )
}

async fn update_doctor(
    State(ctx): State<ApiContext>,
    headers: HeaderMap,
    Form(form_data): Form<DoctorForm>,
) -> PageResult {
    let identity = session(&ctx, &headers)?;
    let conn = open(&ctx)?;
    let profile = own_doctor_profile(&conn, &identity)?;

    let mut errors = FieldErrors::new();
    let changes = form_data.changes(&mut errors);
    if !errors.is_empty() {
        return ok_page(&identity, "Edit doctor profile", &form_data.render(&errors));
    }
    match form_outcome(profiles::update_doctor_profile(&conn, profile, changes))? {
        Ok(_) => Ok(Redirect::to(PROFILE_PATH).into_response()),
        Err(errors) => ok_page(&identity, "Edit doctor profile", &form_data.render(&errors)),
    }
}

// ═══════════════════════════════════════════════════════════
// Health profile
// ═══════════════════════════════════════════════════════════

async fn health_profile(State(ctx): State<ApiContext>, headers: HeaderMap) -> PageResult {
    let identity = session(&ctx, &headers)?;
    let conn = open(&ctx)?;
    let view = profiles::health_summary(&conn, &identity)?;
    let hp = &view.profile;

    let mut content = format!("<p>Profile {}% complete.</p>", view.completion_percentage);
    content.push_str(&details(&[
        ("Gender", opt_display(&hp.gender)),
        ("Height (cm)", opt_display(&hp.height)),
        ("Weight (kg)", opt_display(&hp.weight)),
        ("BMI", view.bmi.map(|b| format!("{b:.1}")).unwrap_or_default()),
        ("BMI category", opt_display(&view.bmi_category)),
        ("Blood type", opt_display(&hp.blood_type)),
        ("Allergies", hp.allergies.clone()),
        ("Current medications", hp.current_medications.clone()),
        ("Medical conditions", hp.medical_conditions.clone()),
        ("Surgical history", hp.surgical_history.clone()),
        ("Family history", hp.family_history.clone()),
        ("Smoking", hp.smoking_status.clone().unwrap_or_default()),
        ("Alcohol", hp.alcohol_consumption.clone().unwrap_or_default()),
        ("Exercise", hp.exercise_frequency.clone().unwrap_or_default()),
        ("Primary doctor", hp.primary_doctor_name.clone()),
        ("Doctor phone", hp.primary_doctor_phone.clone()),
        ("Clinic", hp.primary_doctor_clinic.clone()),
        ("Emergency contact", hp.emergency_contact_name.clone()),
        ("Emergency phone", hp.emergency_contact_phone.clone()),
        ("Insurance provider", hp.insurance_provider.clone()),
        ("Insurance ID", hp.insurance_id.clone()),
        ("Notes", hp.additional_notes.clone()),
    ]));
    content.push_str(r#"<p><a href="/web/health/profile/edit">Edit health profile</a></p>"#);
    ok_page(&identity, "Health profile", &content)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct HealthForm {
    pub gender: String,
    pub height: String,
    pub weight: String,
    pub blood_type: String,
    pub allergies: String,
    pub current_medications: String,
    pub medical_conditions: String,
    pub surgical_history: String,
    pub family_history: String,
    pub smoking_status: String,
    pub alcohol_consumption: String,
    pub exercise_frequency: String,
    pub primary_doctor_name: String,
    pub primary_doctor_phone: String,
    pub primary_doctor_clinic: String,
    pub emergency_contact_name: String,
    pub emergency_contact_phone: String,
    pub emergency_contact_relation: String,
    pub insurance_provider: String,
    pub insurance_id: String,
    pub insurance_group: String,
    pub additional_notes: String,
    pub is_complete: Option<String>,
}

impl HealthForm {
    fn from_profile(hp: &HealthProfile) -> Self {
        Self {
            gender: opt_display(&hp.gender),
            height: opt_display(&hp.height),
            weight: opt_display(&hp.weight),
            blood_type: opt_display(&hp.blood_type),
            allergies: hp.allergies.clone(),
            current_medications: hp.current_medications.clone(),
            medical_conditions: hp.medical_conditions.clone(),
            surgical_history: hp.surgical_history.clone(),
            family_history: hp.family_history.clone(),
            smoking_status: hp.smoking_status.clone().unwrap_or_default(),
            alcohol_consumption: hp.alcohol_consumption.clone().unwrap_or_default(),
            exercise_frequency: hp.exercise_frequency.clone().unwrap_or_default(),
            primary_doctor_name: hp.primary_doctor_name.clone(),
            primary_doctor_phone: hp.primary_doctor_phone.clone(),
            primary_doctor_clinic: hp.primary_doctor_clinic.clone(),
            emergency_contact_name: hp.emergency_contact_name.clone(),
            emergency_contact_phone: hp.emergency_contact_phone.clone(),
            emergency_contact_relation: hp.emergency_contact_relation.clone(),
            insurance_provider: hp.insurance_provider.clone(),
            insurance_id: hp.insurance_id.clone(),
            insurance_group: hp.insurance_group.clone(),
            additional_notes: hp.additional_notes.clone(),
            is_complete: hp.is_complete.then(|| "on".to_string()),
        }
    }

    fn render(&self, errors: &FieldErrors) -> String {
        let genders = choices(Gender::ALL, Gender::as_str);
        let blood_types = choices(BloodType::ALL, BloodType::as_str);
        let fields = [
            "<h2>Basics</h2>".to_string(),
            select("gender", "Gender", &genders, &self.gender, errors),
            input("number", "height", "Height (cm)", &self.height, errors),
            input("number", "weight", "Weight (kg)", &self.weight, errors),
            select("blood_type", "Blood type", &blood_types, &self.blood_type, errors),
            "<h2>Medical history</h2>".to_string(),
            textarea("allergies", "Allergies", &self.allergies, errors),
            textarea("current_medications", "Current medications", &self.current_medications, errors),
            textarea("medical_conditions", "Medical conditions", &self.medical_conditions, errors),
            textarea("surgical_history", "Surgical history", &self.surgical_history, errors),
            textarea("family_history", "Family history", &self.family_history, errors),
            "<h2>Lifestyle</h2>".to_string(),
            text("smoking_status", "Smoking status", &self.smoking_status, errors),
            text("alcohol_consumption", "Alcohol consumption", &self.alcohol_consumption, errors),
            text("exercise_frequency", "Exercise frequency", &self.exercise_frequency, errors),
            "<h2>Care team</h2>".to_string(),
            text("primary_doctor_name", "Primary doctor", &self.primary_doctor_name, errors),
            text("primary_doctor_phone", "Doctor phone", &self.primary_doctor_phone, errors),
            text("primary_doctor_clinic", "Clinic", &self.primary_doctor_clinic, errors),
            text("emergency_contact_name", "Emergency contact", &self.emergency_contact_name, errors),
            text("emergency_contact_phone", "Emergency phone", &self.emergency_contact_phone, errors),
            text("emergency_contact_relation", "Relation", &self.emergency_contact_relation, errors),
            "<h2>Insurance</h2>".to_string(),
            text("insurance_provider", "Provider", &self.insurance_provider, errors),
            text("insurance_id", "Member ID", &self.insurance_id, errors),
            text("insurance_group", "Group", &self.insurance_group, errors),
            textarea("additional_notes", "Notes", &self.additional_notes, errors),
            checkbox("is_complete", "Mark profile as complete", self.is_complete.is_some()),
        ]
        .concat();
        form("/web/health/profile/edit", &fields, "Save")
    }

    fn changes(&self, errors: &mut FieldErrors) -> HealthProfileChanges {
        HealthProfileChanges {
            gender: Some(parse_choice(&self.gender, "gender", errors)),
            height: Some(parse_opt(&self.height, "height", "Enter a number.", errors)),
            weight: Some(parse_opt(&self.weight, "weight", "Enter a number.", errors)),
            blood_type: Some(parse_choice(&self.blood_type, "blood_type", errors)),
            allergies: Some(self.allergies.clone()),
            current_medications: Some(self.current_medications.clone()),
            medical_conditions: Some(self.medical_conditions.clone()),
            surgical_history: Some(self.surgical_history.clone()),
            family_history: Some(self.family_history.clone()),
            smoking_status: Some(blank_to_none(&self.smoking_status)),
            alcohol_consumption: Some(blank_to_none(&self.alcohol_consumption)),
            exercise_frequency: Some(blank_to_none(&self.exercise_frequency)),
            primary_doctor_name: Some(self.primary_doctor_name.clone()),
            primary_doctor_phone: Some(self.primary_doctor_phone.clone()),
            primary_doctor_clinic: Some(self.primary_doctor_clinic.clone()),
            emergency_contact_name: Some(self.emergency_contact_name.clone()),
            emergency_contact_phone: Some(self.emergency_contact_phone.clone()),
            emergency_contact_relation: Some(self.emergency_contact_relation.clone()),
            insurance_provider: Some(self.insurance_provider.clone()),
            insurance_id: Some(self.insurance_id.clone()),
            insurance_group: Some(self.insurance_group.clone()),
            additional_notes: Some(self.additional_notes.clone()),
            is_complete: Some(self.is_complete.is_some()),
        }
    }
}

fn own_health_profile(conn: &Connection, identity: &Identity) -> Result<HealthProfile, PageError> {
    repository::get_health_profile_by_user(conn, &identity.user_id)?.ok_or(PageError::NotFound("Health profile"))
}

async fn health_page(State(ctx): State<ApiContext>, headers: HeaderMap) -> PageResult {
    let identity = session(&ctx, &headers)?;
    let conn = open(&ctx)?;
    let hp = own_health_profile(&conn, &identity)?;
    ok_page(
        &identity,
        "Edit health profile",
        &HealthForm::from_profile(&hp).render(&FieldErrors::new()),
    )
}

async fn update_health(
    State(ctx): State<ApiContext>,
    headers: HeaderMap,
    Form(form_data): Form<HealthForm>,
) -> PageResult {
    let identity = session(&ctx, &headers)?;
    let conn = open(&ctx)?;
    let hp = own_health_profile(&conn, &identity)?;

    let mut errors = FieldErrors::new();
    let changes = form_data.changes(&mut errors);
    if !errors.is_empty() {
        return ok_page(&identity, "Edit health profile", &form_data.render(&errors));
    }
    match form_outcome(profiles::update_health_profile(&conn, hp, changes))? {
        Ok(_) => Ok(Redirect::to(HEALTH_PATH).into_response()),
        Err(errors) => ok_page(&identity, "Edit health profile", &form_data.render(&errors)),
    }
}

// ═══════════════════════════════════════════════════════════
// Family members
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FamilyForm {
    pub name: String,
    pub relationship: String,
    pub email: String,
    pub phone: String,
    pub date_of_birth: String,
    pub can_view: Option<String>,
    pub can_edit: Option<String>,
    pub is_emergency_contact: Option<String>,
    pub emergency_contact_priority: String,
}

impl FamilyForm {
    fn from_member(m: &FamilyMember) -> Self {
        let on = |flag: bool| flag.then(|| "on".to_string());
        Self {
            name: m.name.clone(),
            relationship: m.relationship.to_string(),
            email: m.email.clone(),
            phone: m.phone.clone(),
            date_of_birth: opt_display(&m.date_of_birth),
            can_view: on(m.can_view),
            can_edit: on(m.can_edit),
            is_emergency_contact: on(m.is_emergency_contact),
            emergency_contact_priority: m.emergency_contact_priority.to_string(),
        }
    }

    fn render(&self, action: &str, errors: &FieldErrors) -> String {
        let relationships = choices(Relationship::ALL, Relationship::as_str);
        let fields = [
            text("name", "Name", &self.name, errors),
            select("relationship", "Relationship", &relationships, &self.relationship, errors),
            input("email", "email", "Email", &self.email, errors),
            text("phone", "Phone", &self.phone, errors),
            input("date", "date_of_birth", "Date of birth", &self.date_of_birth, errors),
            checkbox("can_view", "Can view my records", self.can_view.is_some()),
            checkbox("can_edit", "Can edit my records", self.can_edit.is_some()),
            checkbox("is_emergency_contact", "Emergency contact", self.is_emergency_contact.is_some()),
            input(
                "number",
                "emergency_contact_priority",
                "Emergency priority (1-5)",
                &self.emergency_contact_priority,
                errors,
            ),
        ]
        .concat();
        form(action, &fields, "Save")
    }

    fn changes(&self, errors: &mut FieldErrors) -> FamilyMemberChanges {
        let name = self.name.trim();
        FamilyMemberChanges {
            name: (!name.is_empty()).then(|| name.to_string()),
            relationship: parse_choice(&self.relationship, "relationship", errors),
            email: Some(self.email.clone()),
            phone: Some(self.phone.clone()),
            date_of_birth: Some(parse_date(&self.date_of_birth, "date_of_birth", errors)),
            health_profile_id: None,
            can_view: Some(self.can_view.is_some()),
            can_edit: Some(self.can_edit.is_some()),
            is_emergency_contact: Some(self.is_emergency_contact.is_some()),
            emergency_contact_priority: parse_opt(
                &self.emergency_contact_priority,
                "emergency_contact_priority",
                "Enter a whole number.",
                errors,
            ),
        }
    }
}

fn family_table(members: &[FamilyMember]) -> String {
    if members.is_empty() {
        return "<p>No family members yet.</p>".to_string();
    }
    let rows: String = members
        .iter()
        .map(|m| {
            let emergency = if m.is_emergency_contact {
                format!("Yes (priority {})", m.emergency_contact_priority)
            } else {
                "No".to_string()
            };
            format!(
                r#"<tr><td>{name}</td><td>{relationship}</td><td>{phone}</td><td>{emergency}</td><td><a href="/web/family-members/{id}/edit">Edit</a> <a href="/web/family-members/{id}/delete">Delete</a></td></tr>"#,
                name = escape(&m.name),
                relationship = m.relationship,
                phone = escape(&m.phone),
                id = m.id,
            )
        })
        .collect();
    format!(
        "<table><thead><tr><th>Name</th><th>Relationship</th><th>Phone</th><th>Emergency</th><th></th></tr></thead><tbody>{rows}</tbody></table>"
    )
}

fn owned_member(conn: &Connection, identity: &Identity, raw_id: &str) -> Result<FamilyMember, PageError> {
    let id = Uuid::parse_str(raw_id).map_err(|_| PageError::NotFound("Family member"))?;
    Ok(family::visible_family_member(conn, identity, &id)?)
}

async fn family_list(State(ctx): State<ApiContext>, headers: HeaderMap) -> PageResult {
    let identity = session(&ctx, &headers)?;
    let conn = open(&ctx)?;
    let members = family::list_family_members(&conn, &identity)?;
    let content = format!(
        r#"{}<p><a href="/web/family-members/add">Add family member</a></p>"#,
        family_table(&members)
    );
    ok_page(&identity, "Family members", &content)
}

async fn family_add_page(State(ctx): State<ApiContext>, headers: HeaderMap) -> PageResult {
    let identity = session(&ctx, &headers)?;
    let blank = FamilyForm {
        emergency_contact_priority: family::MIN_PRIORITY.to_string(),
        ..Default::default()
    };
    ok_page(
        &identity,
        "Add family member",
        &blank.render("/web/family-members/add", &FieldErrors::new()),
    )
}

async fn add_family_member(
    State(ctx): State<ApiContext>,
    headers: HeaderMap,
    Form(form_data): Form<FamilyForm>,
) -> PageResult {
    let identity = session(&ctx, &headers)?;
    let action = "/web/family-members/add";

    let mut errors = FieldErrors::new();
    let changes = form_data.changes(&mut errors);
    if !errors.is_empty() {
        return ok_page(&identity, "Add family member", &form_data.render(action, &errors));
    }
    let conn = open(&ctx)?;
    match form_outcome(family::create_family_member(&conn, &identity, changes))? {
        Ok(_) => Ok(Redirect::to(FAMILY_PATH).into_response()),
        Err(errors) => ok_page(&identity, "Add family member", &form_data.render(action, &errors)),
    }
}

async fn family_edit_page(
    State(ctx): State<ApiContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> PageResult {
    let identity = session(&ctx, &headers)?;
    let conn = open(&ctx)?;
    let member = owned_member(&conn, &identity, &id)?;
    let action = format!("/web/family-members/{}/edit", member.id);
    ok_page(
        &identity,
        "Edit family member",
        &FamilyForm::from_member(&member).render(&action, &FieldErrors::new()),
    )
}

async fn edit_family_member(
    State(ctx): State<ApiContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Form(form_data): Form<FamilyForm>,
) -> PageResult {
    let identity = session(&ctx, &headers)?;
    let conn = open(&ctx)?;
    let member = owned_member(&conn, &identity, &id)?;
    let action = format!("/web/family-members/{}/edit", member.id);

    let mut errors = FieldErrors::new();
    let changes = form_data.changes(&mut errors);
    if changes.name.is_none() {
        errors.add("name", "This field is required.");
    }
    if !errors.is_empty() {
        return ok_page(&identity, "Edit family member", &form_data.render(&action, &errors));
    }
    match form_outcome(family::update_family_member(&conn, &identity, member, changes))? {
        Ok(_) => Ok(Redirect::to(FAMILY_PATH).into_response()),
        Err(errors) => ok_page(&identity, "Edit family member", &form_data.render(&action, &errors)),
    }
}

async fn family_delete_page(
    State(ctx): State<ApiContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> PageResult {
    let identity = session(&ctx, &headers)?;
    let conn = open(&ctx)?;
    let member = owned_member(&conn, &identity, &id)?;
    let content = format!(
        r#"<p>Remove {name} from your family members?</p>{form}<p><a href="/web/family-members">Cancel</a></p>"#,
        name = escape(&member.name),
        form = form(&format!("/web/family-members/{}/delete", member.id), "", "Delete"),
    );
    ok_page(&identity, "Delete family member", &content)
}

async fn delete_family_member(
    State(ctx): State<ApiContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> PageResult {
    let identity = session(&ctx, &headers)?;
    let conn = open(&ctx)?;
    let member = owned_member(&conn, &identity, &id)?;
    family::delete_family_member(&conn, &member.id)?;
    tracing::info!(member_id = %member.id, "family member removed");
    Ok(Redirect::to(FAMILY_PATH).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::build_router;
    use crate::config::AppConfig;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    struct TestSite {
        app: Router,
        ctx: ApiContext,
        _dir: tempfile::TempDir,
    }

    impl TestSite {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let db_path = dir.path().join("web.db");
            crate::db::open_database(&db_path).unwrap();
            let ctx = ApiContext::new(AppConfig {
                db_path,
                bind_addr: "127.0.0.1:0".parse().unwrap(),
                jwt_secret: b"web-test-secret-0123456789abcdef".to_vec(),
                access_ttl_secs: 300,
                refresh_ttl_secs: 86_400,
            });
            Self {
                app: build_router(ctx.clone()),
                ctx,
                _dir: dir,
            }
        }

        fn register(&self, username: &str, role: Role) -> User {
            let conn = self.ctx.open_db().unwrap();
            accounts::register(&conn, None, accounts::registration(username, role)).unwrap()
        }

        async fn send(&self, req: Request<Body>) -> (StatusCode, HeaderMap, String) {
            let resp = self.app.clone().oneshot(req).await.unwrap();
            let status = resp.status();
            let headers = resp.headers().clone();
            let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
            (status, headers, String::from_utf8(bytes.to_vec()).unwrap())
        }

        async fn get(&self, path: &str, cookie: Option<&str>) -> (StatusCode, HeaderMap, String) {
            let mut req = Request::builder().uri(path);
            if let Some(c) = cookie {
                req = req.header(header::COOKIE, c);
            }
            self.send(req.body(Body::empty()).unwrap()).await
        }

        async fn post(&self, path: &str, cookie: Option<&str>, form: &str) -> (StatusCode, HeaderMap, String) {
            let mut req = Request::builder()
                .method("POST")
                .uri(path)
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
            if let Some(c) = cookie {
                req = req.header(header::COOKIE, c);
            }
            self.send(req.body(Body::from(form.to_string())).unwrap()).await
        }

        /// Logs in and returns the `Cookie` header value for the session.
        async fn login(&self, username: &str) -> String {
            let form = format!("username={username}&password=long-enough-pw");
            let (status, headers, _) = self.post("/web/login", None, &form).await;
            assert_eq!(status, StatusCode::SEE_OTHER);
            let set_cookie = headers.get(header::SET_COOKIE).unwrap().to_str().unwrap();
            set_cookie.split(';').next().unwrap().to_string()
        }
    }

    fn location(headers: &HeaderMap) -> &str {
        headers.get(header::LOCATION).unwrap().to_str().unwrap()
    }

    #[test]
    fn escape_covers_markup_characters() {
        assert_eq!(escape(r#"<a href="x">'&'</a>"#), "&lt;a href=&quot;x&quot;&gt;&#39;&amp;&#39;&lt;/a&gt;");
    }

    #[test]
    fn blank_optional_fields_parse_to_none() {
        let mut errors = FieldErrors::new();
        assert_eq!(parse_date("  ", "date_of_birth", &mut errors), None);
        assert_eq!(parse_opt::<f64>("", "height", "Enter a number.", &mut errors), None);
        assert!(errors.is_empty());

        assert_eq!(parse_opt::<f64>("tall", "height", "Enter a number.", &mut errors), None);
        assert_eq!(errors.get("height").unwrap(), ["Enter a number."]);
    }

    #[tokio::test]
    async fn pages_redirect_to_login_without_session() {
        let site = TestSite::new();
        let (status, headers, _) = site.get("/web/dashboard", None).await;
        assert_eq!(status, StatusCode::SEE_OTHER);
        assert_eq!(location(&headers), LOGIN_PATH);

        let (status, headers, _) = site.get("/web/family-members", Some("caresync_session=forged")).await;
        assert_eq!(status, StatusCode::SEE_OTHER);
        assert_eq!(location(&headers), LOGIN_PATH);
    }

    #[tokio::test]
    async fn wrong_password_rerenders_login_form() {
        let site = TestSite::new();
        site.register("alice", Role::Patient);
        let (status, headers, body) = site.post("/web/login", None, "username=alice&password=nope").await;
        assert_eq!(status, StatusCode::OK);
        assert!(headers.get(header::SET_COOKIE).is_none());
        assert!(body.contains("Please enter a correct username and password."));
        assert!(body.contains(r#"value="alice""#));
    }

    #[tokio::test]
    async fn login_sets_http_only_session_cookie() {
        let site = TestSite::new();
        site.register("alice", Role::Patient);
        let (status, headers, _) = site
            .post("/web/login", None, "username=alice&password=long-enough-pw")
            .await;
        assert_eq!(status, StatusCode::SEE_OTHER);
        assert_eq!(location(&headers), DASHBOARD_PATH);
        let cookie = headers.get(header::SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.starts_with("caresync_session="));
        assert!(cookie.contains("HttpOnly"));

        let session = cookie.split(';').next().unwrap();
        let (status, headers, body) = site.get("/web/dashboard", Some(session)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers.get(header::CACHE_CONTROL).unwrap(), "no-store");
        assert!(body.contains("Welcome, alice"));
        assert!(body.contains("Health profile completion"));
    }

    #[tokio::test]
    async fn logout_expires_cookie() {
        let site = TestSite::new();
        let (status, headers, _) = site.post("/web/logout", None, "").await;
        assert_eq!(status, StatusCode::SEE_OTHER);
        let cookie = headers.get(header::SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.contains("Max-Age=0"));
    }

    #[tokio::test]
    async fn signup_creates_account_and_signs_in() {
        let site = TestSite::new();
        let form = "username=newdoc&email=newdoc%40example.com&password=long-enough-pw\
                    &password2=long-enough-pw&user_type=doctor";
        let (status, headers, _) = site.post("/web/signup", None, form).await;
        assert_eq!(status, StatusCode::SEE_OTHER);
        assert!(headers.get(header::SET_COOKIE).is_some());

        let cookie = site.login("newdoc").await;
        let (status, _, body) = site.get("/web/profile", Some(&cookie)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Doctor profile"));
    }

    #[tokio::test]
    async fn signup_reports_mismatched_passwords() {
        let site = TestSite::new();
        let form = "username=bob&email=bob%40example.com&password=long-enough-pw\
                    &password2=different-pw&user_type=patient";
        let (status, headers, body) = site.post("/web/signup", None, form).await;
        assert_eq!(status, StatusCode::OK);
        assert!(headers.get(header::SET_COOKIE).is_none());
        assert!(body.contains("Passwords do not match."));
    }

    #[tokio::test]
    async fn health_edit_updates_bmi() {
        let site = TestSite::new();
        site.register("alice", Role::Patient);
        let cookie = site.login("alice").await;

        let (status, headers, _) = site
            .post("/web/health/profile/edit", Some(&cookie), "height=180&weight=81&gender=female")
            .await;
        assert_eq!(status, StatusCode::SEE_OTHER);
        assert_eq!(location(&headers), HEALTH_PATH);

        let (status, _, body) = site.get("/web/health/profile", Some(&cookie)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("25.0"));
        assert!(body.contains("overweight"));
    }

    #[tokio::test]
    async fn health_edit_rejects_unparseable_numbers() {
        let site = TestSite::new();
        site.register("alice", Role::Patient);
        let cookie = site.login("alice").await;

        let (status, _, body) = site
            .post("/web/health/profile/edit", Some(&cookie), "height=tall&weight=81")
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Enter a number."));
        assert!(body.contains(r#"value="tall""#));
    }

    #[tokio::test]
    async fn doctor_has_no_patient_profile_page() {
        let site = TestSite::new();
        site.register("drsmith", Role::Doctor);
        let cookie = site.login("drsmith").await;
        let (status, _, _) = site.get("/web/profile/patient/update", Some(&cookie)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn family_member_lifecycle() {
        let site = TestSite::new();
        site.register("alice", Role::Patient);
        let cookie = site.login("alice").await;

        let (status, _, body) = site
            .post("/web/family-members/add", Some(&cookie), "name=%3Cb%3EBob%3C%2Fb%3E&relationship=spouse")
            .await;
        assert_eq!(status, StatusCode::SEE_OTHER, "{body}");

        let (_, _, body) = site.get("/web/family-members", Some(&cookie)).await;
        assert!(body.contains("&lt;b&gt;Bob&lt;/b&gt;"));
        assert!(!body.contains("<b>Bob</b>"));

        let conn = site.ctx.open_db().unwrap();
        let alice = repository::get_user_by_username(&conn, "alice").unwrap().unwrap();
        let member = repository::list_family_members(&conn, &alice.id).unwrap().remove(0);

        let edit = format!("/web/family-members/{}/edit", member.id);
        let (status, _, body) = site
            .post(&edit, Some(&cookie), "name=Bob&relationship=spouse&emergency_contact_priority=9")
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Ensure this value is between 1 and 5."));

        let (status, _, _) = site
            .post(&edit, Some(&cookie), "name=Bob&relationship=spouse&is_emergency_contact=on&emergency_contact_priority=2")
            .await;
        assert_eq!(status, StatusCode::SEE_OTHER);
        let updated = repository::get_family_member(&conn, &member.id).unwrap().unwrap();
        assert!(updated.is_emergency_contact);
        assert_eq!(updated.emergency_contact_priority, 2);

        let delete = format!("/web/family-members/{}/delete", member.id);
        let (status, _, _) = site.post(&delete, Some(&cookie), "").await;
        assert_eq!(status, StatusCode::SEE_OTHER);
        assert!(repository::get_family_member(&conn, &member.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn other_users_family_member_is_not_found() {
        let site = TestSite::new();
        site.register("alice", Role::Patient);
        site.register("mallory", Role::Patient);
        let alice_cookie = site.login("alice").await;
        site.post("/web/family-members/add", Some(&alice_cookie), "name=Bob&relationship=child")
            .await;

        let conn = site.ctx.open_db().unwrap();
        let alice = repository::get_user_by_username(&conn, "alice").unwrap().unwrap();
        let member = repository::list_family_members(&conn, &alice.id).unwrap().remove(0);

        let mallory_cookie = site.login("mallory").await;
        let (status, _, _) = site
            .get(&format!("/web/family-members/{}/edit", member.id), Some(&mallory_cookie))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _, _) = site.get("/web/family-members/not-a-uuid/edit", Some(&mallory_cookie)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
