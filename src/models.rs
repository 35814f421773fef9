use crate::schema::*;
use chrono::NaiveDateTime;
use diesel::{
    deserialize::{self, FromSql, FromSqlRow},
    expression::AsExpression,
    pg::{Pg, PgValue},
    prelude::*,
    serialize::{self, Output, ToSql},
    sql_types::Text,
};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Declares an enum stored as a lowercase `VARCHAR` column.
macro_rules! text_enum {
    ($(#[$meta:meta])* pub enum $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow)]
        #[diesel(sql_type = Text)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!("unknown {} `{}`", stringify!($name), other)),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ToSql<Text, Pg> for $name {
            fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
                <str as ToSql<Text, Pg>>::to_sql(self.as_str(), out)
            }
        }

        impl FromSql<Text, Pg> for $name {
            fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
                let raw = <String as FromSql<Text, Pg>>::from_sql(bytes)?;
                raw.parse().map_err(Into::into)
            }
        }
    };
}

text_enum! {
    pub enum Role {
        Student => "student",
        Club => "club",
        Admin => "admin",
        Dean => "dean",
    }
}

text_enum! {
    pub enum ClubKind {
        Academic => "academic",
        NonAcademic => "non_academic",
    }
}

text_enum! {
    /// Whether the club already operated before registering on the hub.
    pub enum ClubStanding {
        Existing => "existing",
        New => "new",
    }
}

text_enum! {
    pub enum RequestStatus {
        Pending => "pending",
        AdminApproved => "admin_approved",
        Approved => "approved",
        Rejected => "rejected",
    }
}

text_enum! {
    /// Moderation state shared by posts and events.
    pub enum ReviewStatus {
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
    }
}

text_enum! {
    pub enum ApplicationStatus {
        Pending => "pending",
        Accepted => "accepted",
        Rejected => "rejected",
    }
}

text_enum! {
    pub enum Gender {
        Male => "male",
        Female => "female",
        Other => "other",
    }
}

text_enum! {
    pub enum AcademicYear {
        Freshman => "freshman",
        Sophomore => "sophomore",
        Junior => "junior",
        Senior => "senior",
        Graduate => "graduate",
    }
}

text_enum! {
    pub enum RsvpStatus {
        Going => "going",
        Interested => "interested",
        NotGoing => "not_going",
    }
}

text_enum! {
    pub enum MessageType {
        Direct => "direct",
        Group => "group",
        Broadcast => "broadcast",
    }
}

text_enum! {
    /// Role audience of an admin broadcast.
    pub enum Audience {
        Students => "students",
        Clubs => "clubs",
    }
}

impl Role {
    /// Landing page after login.
    pub fn home_path(&self, id: i32) -> String {
        match self {
            Role::Student => format!("/student/{id}/home"),
            Role::Club => format!("/club/{id}"),
            Role::Admin => "/admin/dashboard".to_string(),
            Role::Dean => "/dean/dashboard".to_string(),
        }
    }

    /// Broadcast audience this role listens to, if any.
    pub fn audience(&self) -> Option<Audience> {
        match self {
            Role::Student => Some(Audience::Students),
            Role::Club => Some(Audience::Clubs),
            Role::Admin | Role::Dean => None,
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub profile_data: serde_json::Value,
    pub is_verified: bool,
    pub is_approved: bool,
    pub verification_token: Option<String>,
    pub reset_token: Option<String>,
    pub reset_expires_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl User {
    pub fn profile(&self) -> anyhow::Result<Profile> {
        Ok(Profile::from_value(self.role, self.profile_data.clone())?)
    }

    /// Kind of a club account. Accounts without a recorded kind take the
    /// academic (dean-reviewed) chain.
    pub fn club_kind(&self) -> anyhow::Result<ClubKind> {
        match self.profile()? {
            Profile::Club(club) => Ok(club.kind.unwrap_or(ClubKind::Academic)),
            _ => Err(anyhow::anyhow!("user {} is not a club", self.id)),
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub profile_data: serde_json::Value,
    pub is_verified: bool,
    pub is_approved: bool,
    pub verification_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StudentProfile {
    pub full_name: String,
    pub bio: String,
    pub email: String,
    pub phone: String,
    pub linkedin: String,
    pub profile_pic: String,
    pub cv: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClubProfile {
    pub club_name: String,
    pub club_description: String,
    pub representative_name: String,
    pub kind: Option<ClubKind>,
    pub email: String,
    pub phone: String,
    pub linkedin: String,
    pub instagram: String,
    pub tiktok: String,
    pub x: String,
    pub logo: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StaffProfile {
    pub full_name: String,
}

/// Profile blob of a user, selected by the user's role.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Profile {
    Student(StudentProfile),
    Club(ClubProfile),
    Staff(StaffProfile),
}

impl Profile {
    pub fn from_value(role: Role, value: serde_json::Value) -> serde_json::Result<Profile> {
        Ok(match role {
            Role::Student => Profile::Student(serde_json::from_value(value)?),
            Role::Club => Profile::Club(serde_json::from_value(value)?),
            Role::Admin | Role::Dean => Profile::Staff(serde_json::from_value(value)?),
        })
    }

    pub fn to_value(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }

    /// Name shown as the account's username.
    pub fn display_name(&self) -> &str {
        match self {
            Profile::Student(p) => &p.full_name,
            Profile::Club(p) => &p.club_name,
            Profile::Staff(p) => &p.full_name,
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClubRequest {
    pub id: i32,
    pub club_name: String,
    pub club_email: String,
    pub club_description: Option<String>,
    pub representative_name: Option<String>,
    #[serde(skip)]
    pub password_hash: String,
    pub status: RequestStatus,
    pub admin_notes: Option<String>,
    pub club_kind: ClubKind,
    pub club_status: Option<ClubStanding>,
    pub club_vision: Option<String>,
    pub club_activities: Option<String>,
    pub president_name: Option<String>,
    pub president_student_id: Option<String>,
    pub president_phone: Option<String>,
    pub president_college: Option<String>,
    pub vp_name: Option<String>,
    pub vp_student_id: Option<String>,
    pub vp_phone: Option<String>,
    pub members: Vec<String>,
    pub advisor_name: Option<String>,
    pub advisor_email: Option<String>,
    pub advisor_signature: Option<String>,
    pub club_socials: Option<String>,
    pub club_members_count: Option<i32>,
    pub club_fair: Option<bool>,
    pub club_logo: Option<String>,
    pub dean_name: Option<String>,
    pub dean_signature: Option<String>,
    pub dean_approval_date: Option<NaiveDateTime>,
    pub dean_approved: bool,
    pub dean_notes: Option<String>,
    pub dsa_name: Option<String>,
    pub dsa_signature: Option<String>,
    pub dsa_approval_date: Option<NaiveDateTime>,
    pub approved_by_admin: bool,
    pub admin_approval_date: Option<NaiveDateTime>,
    pub is_verified: bool,
    #[serde(skip)]
    pub verification_token: Option<String>,
    pub user_id: Option<i32>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl ClubRequest {
    /// Profile of the club account materialized from this request.
    pub fn club_profile(&self) -> ClubProfile {
        ClubProfile {
            club_name: self.club_name.clone(),
            club_description: self.club_description.clone().unwrap_or_default(),
            representative_name: self.representative_name.clone().unwrap_or_default(),
            kind: Some(self.club_kind),
            email: self.club_email.clone(),
            logo: self.club_logo.clone().unwrap_or_default(),
            ..ClubProfile::default()
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Serialize)]
#[diesel(belongs_to(User, foreign_key = club_id))]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: i32,
    pub club_id: i32,
    pub text: Option<String>,
    pub image: Option<String>,
    pub video: Option<String>,
    pub status: ReviewStatus,
    pub admin_notes: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Serialize)]
#[diesel(belongs_to(User, foreign_key = club_id))]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: i32,
    pub club_id: i32,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub starts_at: Option<NaiveDateTime>,
    pub ends_at: Option<NaiveDateTime>,
    pub capacity: Option<i32>,
    pub organizer_name: Option<String>,
    pub expected_attendance: Option<i32>,
    pub budget: Option<String>,
    pub requirements: Option<String>,
    pub attachments: Vec<String>,
    pub approved_by_admin: bool,
    pub approved_by_dean: bool,
    pub status: ReviewStatus,
    pub admin_notes: Option<String>,
    pub dean_notes: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Event {
    /// An event has elapsed once its end (or, lacking one, its start) is in
    /// the past. Undated events never elapse.
    pub fn has_elapsed(&self, now: NaiveDateTime) -> bool {
        self.ends_at.or(self.starts_at).map_or(false, |t| t < now)
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Serialize)]
#[diesel(belongs_to(Event))]
#[serde(rename_all = "camelCase")]
pub struct EventReport {
    pub id: i32,
    pub event_id: i32,
    pub club_id: i32,
    pub club_name: String,
    pub faculty_adviser_name: String,
    pub activity_title: String,
    pub activity_date: NaiveDateTime,
    pub activity_location: String,
    pub purpose_of_activity: String,
    pub activity_description: String,
    pub managing_students: String,
    pub participating_students: String,
    pub number_of_attendance: i32,
    pub evaluation_results: String,
    pub recommendations: String,
    pub photos: Vec<String>,
    pub attendance_sheet: Vec<String>,
    pub receipts_and_liquidation: Vec<String>,
    pub activity_proposal: Vec<String>,
    pub supporting_documents: Vec<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub id: i32,
    pub club_id: i32,
    pub student_id: i32,
    pub email: String,
    pub student_name: String,
    pub gender: Gender,
    pub major: String,
    pub academic_year: AcademicYear,
    pub skills: String,
    pub motivation: String,
    pub message: Option<String>,
    pub status: ApplicationStatus,
    pub club_notes: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Serialize)]
#[diesel(belongs_to(User, foreign_key = club_id))]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: i32,
    pub student_id: i32,
    pub club_id: i32,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rsvp {
    pub id: i32,
    pub student_id: i32,
    pub event_id: i32,
    pub status: RsvpStatus,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: i32,
    pub sender_id: i32,
    pub receiver_id: Option<i32>,
    pub club_id: Option<i32>,
    pub message: String,
    pub message_type: MessageType,
    pub admin_target: Option<Audience>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLog {
    pub id: i32,
    pub admin_id: i32,
    pub action: String,
    pub target_type: String,
    pub target_id: i32,
    pub details: Option<String>,
    pub created_at: NaiveDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    #[test]
    fn text_enums_parse_their_column_values() {
        assert_eq!("admin_approved".parse::<RequestStatus>(), Ok(RequestStatus::AdminApproved));
        assert_eq!("not_going".parse::<RsvpStatus>(), Ok(RsvpStatus::NotGoing));
        assert_eq!(ClubKind::NonAcademic.as_str(), "non_academic");
        assert!("superuser".parse::<Role>().is_err());
    }

    #[test]
    fn text_enums_serialize_as_column_values() {
        assert_eq!(serde_json::to_value(Role::Dean).unwrap(), json!("dean"));
        let year: AcademicYear = serde_json::from_value(json!("sophomore")).unwrap();
        assert_eq!(year, AcademicYear::Sophomore);
    }

    #[test]
    fn profile_is_selected_by_role() {
        let value = json!({ "fullName": "Sara", "bio": "hi", "cv": "/uploads/cv.pdf" });
        let Profile::Student(profile) = Profile::from_value(Role::Student, value).unwrap() else {
            panic!("expected a student profile");
        };
        assert_eq!(profile.full_name, "Sara");
        assert_eq!(profile.cv, "/uploads/cv.pdf");
        assert_eq!(profile.phone, "");

        let club = Profile::from_value(
            Role::Club,
            json!({ "clubName": "Robotics", "kind": "academic" }),
        )
        .unwrap();
        assert_eq!(club.display_name(), "Robotics");

        let staff = Profile::from_value(Role::Dean, json!({})).unwrap();
        assert_eq!(staff, Profile::Staff(StaffProfile::default()));
    }

    #[test]
    fn profile_round_trips_through_json() {
        let profile = Profile::Club(ClubProfile {
            club_name: "Chess".into(),
            kind: Some(ClubKind::NonAcademic),
            ..ClubProfile::default()
        });
        let value = profile.to_value().unwrap();
        assert_eq!(value["kind"], json!("non_academic"));
        assert_eq!(Profile::from_value(Role::Club, value).unwrap(), profile);
    }

    #[test]
    fn role_homes() {
        assert_eq!(Role::Student.home_path(4), "/student/4/home");
        assert_eq!(Role::Club.home_path(9), "/club/9");
        assert_eq!(Role::Dean.home_path(1), "/dean/dashboard");
    }

    #[test]
    fn events_elapse_by_end_then_start() {
        let at = |h| {
            NaiveDate::from_ymd_opt(2024, 3, 1)
                .and_then(|d| d.and_hms_opt(h, 0, 0))
                .unwrap()
        };
        let mut event = Event {
            id: 1,
            club_id: 2,
            title: "Hackathon".into(),
            description: None,
            location: None,
            starts_at: Some(at(9)),
            ends_at: Some(at(17)),
            capacity: None,
            organizer_name: None,
            expected_attendance: None,
            budget: None,
            requirements: None,
            attachments: vec![],
            approved_by_admin: true,
            approved_by_dean: true,
            status: ReviewStatus::Approved,
            admin_notes: None,
            dean_notes: None,
            created_at: at(0),
            updated_at: at(0),
        };
        assert!(!event.has_elapsed(at(12)));
        assert!(event.has_elapsed(at(18)));

        event.ends_at = None;
        assert!(event.has_elapsed(at(12)));

        event.starts_at = None;
        assert!(!event.has_elapsed(at(23)));
    }
}
