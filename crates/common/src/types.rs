use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Record families swept by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Task,
    Agenda,
    Financial,
}

impl Domain {
    pub const ALL: [Domain; 3] = [Domain::Task, Domain::Agenda, Domain::Financial];

    /// Short tag used in idempotency keys and log fields.
    pub fn tag(&self) -> &'static str {
        match self {
            Domain::Task => "task",
            Domain::Agenda => "agenda",
            Domain::Financial => "financial",
        }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

impl std::str::FromStr for Domain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_label(s).as_str() {
            "task" | "tasks" | "tarefa" | "tarefas" => Ok(Domain::Task),
            "agenda" | "event" | "events" | "evento" | "eventos" => Ok(Domain::Agenda),
            "financial" | "finance" | "financeiro" | "dues" => Ok(Domain::Financial),
            other => Err(format!("unknown domain '{}'", other)),
        }
    }
}

/// Record priority. Ordered: `Low < Medium < High < Urgent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Priority {
    /// Parse a stored priority label. Accepts English and Portuguese spellings,
    /// ignoring case and accents.
    pub fn parse(raw: &str) -> Option<Self> {
        match normalize_label(raw).as_str() {
            "low" | "baixa" | "baixo" => Some(Priority::Low),
            "medium" | "media" | "medio" | "normal" => Some(Priority::Medium),
            "high" | "alta" | "alto" => Some(Priority::High),
            "urgent" | "urgente" | "critical" | "critica" => Some(Priority::Urgent),
            _ => None,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
            Priority::Urgent => write!(f, "urgent"),
        }
    }
}

/// Lifecycle state of a domain record, normalized at the store boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Pending,
    InProgress,
    Scheduled,
    Overdue,
    Completed,
    Cancelled,
    Paid,
}

impl RecordStatus {
    /// Raw labels (lowercased, as the CRUD layer stores them) that mark a
    /// record as terminal. Used to pre-filter candidate queries.
    pub const TERMINAL_LABELS: &[&str] = &[
        "completed",
        "complete",
        "done",
        "concluido",
        "concluído",
        "concluida",
        "concluída",
        "finalizado",
        "finalizada",
        "cancelled",
        "canceled",
        "cancelado",
        "cancelada",
        "paid",
        "pago",
        "paga",
        "quitado",
        "quitada",
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        match normalize_label(raw).as_str() {
            "pending" | "pendente" | "open" | "aberto" | "aberta" | "todo" | "a fazer" => {
                Some(RecordStatus::Pending)
            }
            "in progress" | "em andamento" | "andamento" | "doing" => {
                Some(RecordStatus::InProgress)
            }
            "scheduled" | "agendado" | "agendada" | "confirmed" | "confirmado" | "confirmada" => {
                Some(RecordStatus::Scheduled)
            }
            "overdue" | "atrasado" | "atrasada" | "vencido" | "vencida" => {
                Some(RecordStatus::Overdue)
            }
            "completed" | "complete" | "done" | "concluido" | "concluida" | "finalizado"
            | "finalizada" => Some(RecordStatus::Completed),
            "cancelled" | "canceled" | "cancelado" | "cancelada" => Some(RecordStatus::Cancelled),
            "paid" | "pago" | "paga" | "quitado" | "quitada" => Some(RecordStatus::Paid),
            _ => None,
        }
    }

    /// Terminal records are never notification candidates.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RecordStatus::Completed | RecordStatus::Cancelled | RecordStatus::Paid
        )
    }
}

/// How a person wants to be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPreference {
    #[serde(alias = "Email", alias = "EMAIL")]
    Email,
    #[serde(alias = "whatsapp", alias = "WhatsApp", alias = "Chat")]
    Chat,
    #[serde(alias = "ambos", alias = "Both")]
    Both,
    #[serde(alias = "nenhum", alias = "nenhuma", alias = "None")]
    None,
}

impl NotificationPreference {
    pub fn parse(raw: &str) -> Option<Self> {
        match normalize_label(raw).as_str() {
            "email" | "e mail" => Some(NotificationPreference::Email),
            "chat" | "whatsapp" => Some(NotificationPreference::Chat),
            "both" | "ambos" | "all" => Some(NotificationPreference::Both),
            "none" | "nenhum" | "nenhuma" | "off" => Some(NotificationPreference::None),
            _ => None,
        }
    }

    pub fn wants_email(&self) -> bool {
        matches!(
            self,
            NotificationPreference::Email | NotificationPreference::Both
        )
    }

    pub fn wants_chat(&self) -> bool {
        matches!(
            self,
            NotificationPreference::Chat | NotificationPreference::Both
        )
    }
}

/// Delivery channel family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Email,
    Chat,
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelType::Email => write!(f, "email"),
            ChannelType::Chat => write!(f, "chat"),
        }
    }
}

/// An entry in a record's explicit participant list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub member_id: String,
    /// Per-record override; falls back to the roster member's preference.
    #[serde(default)]
    pub notification: Option<NotificationPreference>,
}

impl Participant {
    pub fn new(member_id: impl Into<String>) -> Self {
        Self {
            member_id: member_id.into(),
            notification: None,
        }
    }
}

/// A task assigned to someone with a due date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: RecordStatus,
    pub priority: Priority,
    pub due_at: DateTime<Utc>,
    pub assigned_to: Option<String>,
    pub created_by: Option<String>,
    pub participants: Vec<Participant>,
}

/// A scheduled agenda event (meeting, class, appointment).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgendaEvent {
    pub id: String,
    pub title: String,
    pub location: Option<String>,
    pub status: RecordStatus,
    pub priority: Priority,
    pub start_at: DateTime<Utc>,
    pub organizer_id: Option<String>,
    pub participants: Vec<Participant>,
    /// Fan out to the whole active roster.
    pub notify_all: bool,
    /// Fan out to active roster members at these hierarchy levels.
    pub hierarchy_levels: Vec<String>,
    pub extra_recipient_ids: Vec<String>,
}

/// A payable or receivable with a due date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinancialDue {
    pub id: String,
    pub description: String,
    pub amount_cents: i64,
    pub status: RecordStatus,
    pub priority: Priority,
    pub due_at: DateTime<Utc>,
    pub owner_id: Option<String>,
    pub responsible_id: Option<String>,
}

/// A record the scheduler may notify about.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "domain", rename_all = "lowercase")]
pub enum PendingRecord {
    Task(Task),
    Agenda(AgendaEvent),
    Financial(FinancialDue),
}

impl PendingRecord {
    pub fn domain(&self) -> Domain {
        match self {
            PendingRecord::Task(_) => Domain::Task,
            PendingRecord::Agenda(_) => Domain::Agenda,
            PendingRecord::Financial(_) => Domain::Financial,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            PendingRecord::Task(t) => &t.id,
            PendingRecord::Agenda(e) => &e.id,
            PendingRecord::Financial(d) => &d.id,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            PendingRecord::Task(t) => &t.title,
            PendingRecord::Agenda(e) => &e.title,
            PendingRecord::Financial(d) => &d.description,
        }
    }

    /// Due instant for tasks and dues, start instant for agenda events.
    pub fn due_at(&self) -> DateTime<Utc> {
        match self {
            PendingRecord::Task(t) => t.due_at,
            PendingRecord::Agenda(e) => e.start_at,
            PendingRecord::Financial(d) => d.due_at,
        }
    }

    pub fn priority(&self) -> Priority {
        match self {
            PendingRecord::Task(t) => t.priority,
            PendingRecord::Agenda(e) => e.priority,
            PendingRecord::Financial(d) => d.priority,
        }
    }

    pub fn status(&self) -> RecordStatus {
        match self {
            PendingRecord::Task(t) => t.status,
            PendingRecord::Agenda(e) => e.status,
            PendingRecord::Financial(d) => d.status,
        }
    }

    /// The person who always hears about this record.
    pub fn owner_id(&self) -> Option<&str> {
        match self {
            PendingRecord::Task(t) => t.assigned_to.as_deref().or(t.created_by.as_deref()),
            PendingRecord::Agenda(e) => e.organizer_id.as_deref(),
            PendingRecord::Financial(d) => d.owner_id.as_deref(),
        }
    }
}

/// A person in the org-wide roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterMember {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub hierarchy_level: Option<String>,
    pub notification_preference: Option<NotificationPreference>,
    pub active: bool,
}

/// A resolved notification target. Computed per sweep, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub role: Option<String>,
    pub preference: NotificationPreference,
}

impl Recipient {
    /// Build a recipient from a roster entry, falling back to `default`
    /// when the member has no stored preference.
    pub fn from_member(member: &RosterMember, default: NotificationPreference) -> Self {
        Self {
            id: member.id.clone(),
            name: member.name.clone(),
            email: member.email.clone(),
            phone: member.phone.clone(),
            role: member.hierarchy_level.clone(),
            preference: member.notification_preference.unwrap_or(default),
        }
    }
}

/// Persisted "already sent" flag for one record + bucket + calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyMarker {
    pub key: String,
    pub domain: Domain,
    pub record_id: String,
    pub bucket: String,
    pub fired_at: DateTime<Utc>,
}

/// Which message template a notification uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    TaskReminder,
    TaskOverdue,
    AgendaReminder,
    FinancialReminder,
    FinancialOverdue,
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationKind::TaskReminder => write!(f, "task_reminder"),
            NotificationKind::TaskOverdue => write!(f, "task_overdue"),
            NotificationKind::AgendaReminder => write!(f, "agenda_reminder"),
            NotificationKind::FinancialReminder => write!(f, "financial_reminder"),
            NotificationKind::FinancialOverdue => write!(f, "financial_overdue"),
        }
    }
}

/// Pointer back to the record a message is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRef {
    pub domain: Domain,
    pub id: String,
}

/// Channel-agnostic notification, built once per recipient and discarded
/// after delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub kind: NotificationKind,
    /// Short subject line (e.g., "Reminder: task due in 3 days")
    pub subject: String,
    /// Plain-text summary shared by every channel
    pub body: String,
    pub priority: Priority,
    pub source: RecordRef,
    pub record_title: String,
    pub due_at: DateTime<Utc>,
    /// `due_at` rendered in the scheduler timezone (e.g., "21/10/2026 14:00")
    pub due_display: String,
    /// Cadence checkpoint label (e.g., "3d", "24h", "overdue-2d")
    pub bucket: String,
    pub recipient_id: String,
    pub recipient_name: String,
    /// Agenda phrasing hints; always false for other domains.
    pub is_today: bool,
    pub is_tomorrow: bool,
    /// Domain-specific extras (location, amount, ...)
    pub details: serde_json::Value,
}

/// Lowercase, strip Portuguese diacritics, and collapse separators so raw
/// labels compare reliably.
pub fn normalize_label(raw: &str) -> String {
    let folded: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            '_' | '-' => ' ',
            other => other,
        })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_parse_accepts_both_languages() {
        assert_eq!(Priority::parse("Urgente"), Some(Priority::Urgent));
        assert_eq!(Priority::parse("HIGH"), Some(Priority::High));
        assert_eq!(Priority::parse("Média"), Some(Priority::Medium));
        assert_eq!(Priority::parse(" baixa "), Some(Priority::Low));
        assert_eq!(Priority::parse("whenever"), None);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Urgent > Priority::High);
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Medium > Priority::Low);
    }

    #[test]
    fn test_status_parse_and_terminal() {
        assert_eq!(RecordStatus::parse("Pendente"), Some(RecordStatus::Pending));
        assert_eq!(
            RecordStatus::parse("em_andamento"),
            Some(RecordStatus::InProgress)
        );
        assert_eq!(
            RecordStatus::parse("Concluída"),
            Some(RecordStatus::Completed)
        );
        assert!(RecordStatus::Completed.is_terminal());
        assert!(RecordStatus::Paid.is_terminal());
        assert!(!RecordStatus::Overdue.is_terminal());
    }

    #[test]
    fn test_terminal_labels_all_parse_as_terminal() {
        for label in RecordStatus::TERMINAL_LABELS {
            let status = RecordStatus::parse(label).expect(label);
            assert!(status.is_terminal(), "{label} should be terminal");
        }
    }

    #[test]
    fn test_preference_parse_and_routing() {
        assert_eq!(
            NotificationPreference::parse("WhatsApp"),
            Some(NotificationPreference::Chat)
        );
        assert_eq!(
            NotificationPreference::parse("ambos"),
            Some(NotificationPreference::Both)
        );
        assert!(NotificationPreference::Both.wants_email());
        assert!(NotificationPreference::Both.wants_chat());
        assert!(!NotificationPreference::None.wants_email());
        assert!(!NotificationPreference::None.wants_chat());
    }

    #[test]
    fn test_participant_deserializes_aliases() {
        let p: Participant =
            serde_json::from_value(serde_json::json!({"member_id": "u1", "notification": "nenhum"}))
                .unwrap();
        assert_eq!(p.notification, Some(NotificationPreference::None));

        let p: Participant = serde_json::from_value(serde_json::json!({"member_id": "u2"})).unwrap();
        assert_eq!(p.notification, None);
    }

    #[test]
    fn test_domain_from_str() {
        assert_eq!("task".parse::<Domain>(), Ok(Domain::Task));
        assert_eq!("Agenda".parse::<Domain>(), Ok(Domain::Agenda));
        assert_eq!("financeiro".parse::<Domain>(), Ok(Domain::Financial));
        assert!("payroll".parse::<Domain>().is_err());
    }

    #[test]
    fn test_task_owner_falls_back_to_creator() {
        let task = PendingRecord::Task(Task {
            id: "T1".to_string(),
            title: "Report".to_string(),
            description: None,
            status: RecordStatus::Pending,
            priority: Priority::Low,
            due_at: Utc::now(),
            assigned_to: None,
            created_by: Some("creator".to_string()),
            participants: vec![],
        });
        assert_eq!(task.owner_id(), Some("creator"));
        assert_eq!(task.domain(), Domain::Task);
    }
}
