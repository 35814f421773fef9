//! Approval chains for club registrations, events and posts.
//!
//! Club requests: `pending -> approved` when the club is non-academic,
//! `pending -> admin_approved -> approved` when it is academic (the dean
//! takes the second step). Admins reject pending requests, deans reject
//! admin-approved ones.
//!
//! Events carry one flag per reviewer. Admins go first; for non-academic
//! clubs their approval also stands in for the dean's. The event is approved
//! once both flags are set. Rejections are terminal.

use crate::models::{ClubKind, RequestStatus, ReviewStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reviewer {
    Admin,
    Dean,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject { notes: String },
}

impl Decision {
    pub fn from_form(approve: bool, notes: Option<String>) -> Decision {
        if approve {
            Decision::Approve
        } else {
            Decision::Reject {
                notes: notes.unwrap_or_default(),
            }
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("this request is already {0}")]
    RequestClosed(RequestStatus),
    #[error("this request is waiting for {0}")]
    NotYourTurn(&'static str),
    #[error("this item has already been reviewed")]
    AlreadyReviewed,
    #[error("non-academic clubs do not need dean approval")]
    DeanNotRequired,
}

fn waiting_for(reviewer: Reviewer) -> &'static str {
    match reviewer {
        Reviewer::Admin => "the admin",
        Reviewer::Dean => "the dean",
    }
}

/// Next status of a club request after `reviewer` decides on it.
pub fn review_club_request(
    status: RequestStatus,
    kind: ClubKind,
    reviewer: Reviewer,
    decision: &Decision,
) -> Result<RequestStatus, TransitionError> {
    use RequestStatus::*;

    let expected = match status {
        Pending => Reviewer::Admin,
        AdminApproved => Reviewer::Dean,
        Approved | Rejected => return Err(TransitionError::RequestClosed(status)),
    };
    if reviewer != expected {
        return Err(TransitionError::NotYourTurn(waiting_for(expected)));
    }

    Ok(match (decision, reviewer, kind) {
        (Decision::Reject { .. }, _, _) => Rejected,
        (Decision::Approve, Reviewer::Admin, ClubKind::Academic) => AdminApproved,
        (Decision::Approve, _, _) => Approved,
    })
}

/// Review state of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventReview {
    pub approved_by_admin: bool,
    pub approved_by_dean: bool,
    pub status: ReviewStatus,
}

impl EventReview {
    pub fn pending() -> EventReview {
        EventReview {
            approved_by_admin: false,
            approved_by_dean: false,
            status: ReviewStatus::Pending,
        }
    }

    /// Applies a review, deriving the status from the two flags.
    pub fn review(
        self,
        kind: ClubKind,
        reviewer: Reviewer,
        decision: &Decision,
    ) -> Result<EventReview, TransitionError> {
        if self.status != ReviewStatus::Pending {
            return Err(TransitionError::AlreadyReviewed);
        }

        let mut next = self;
        match reviewer {
            Reviewer::Admin => {
                if self.approved_by_admin {
                    return Err(TransitionError::NotYourTurn(waiting_for(Reviewer::Dean)));
                }
            }
            Reviewer::Dean => {
                if kind == ClubKind::NonAcademic {
                    return Err(TransitionError::DeanNotRequired);
                }
                if !self.approved_by_admin {
                    return Err(TransitionError::NotYourTurn(waiting_for(Reviewer::Admin)));
                }
            }
        }

        match (decision, reviewer) {
            (Decision::Reject { .. }, _) => next.status = ReviewStatus::Rejected,
            (Decision::Approve, Reviewer::Admin) => {
                next.approved_by_admin = true;
                if kind == ClubKind::NonAcademic {
                    next.approved_by_dean = true;
                }
            }
            (Decision::Approve, Reviewer::Dean) => next.approved_by_dean = true,
        }
        if next.approved_by_admin && next.approved_by_dean {
            next.status = ReviewStatus::Approved;
        }
        Ok(next)
    }

    /// True when this review is the one that made the event public.
    pub fn just_approved(&self, before: &EventReview) -> bool {
        before.status != ReviewStatus::Approved && self.status == ReviewStatus::Approved
    }
}

/// Posts only need the admin.
pub fn review_post(status: ReviewStatus, decision: &Decision) -> Result<ReviewStatus, TransitionError> {
    if status != ReviewStatus::Pending {
        return Err(TransitionError::AlreadyReviewed);
    }
    Ok(match decision {
        Decision::Approve => ReviewStatus::Approved,
        Decision::Reject { .. } => ReviewStatus::Rejected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ClubKind::*;
    use RequestStatus::*;

    fn reject(notes: &str) -> Decision {
        Decision::Reject {
            notes: notes.to_string(),
        }
    }

    #[test]
    fn non_academic_requests_are_approved_by_the_admin_alone() {
        let next = review_club_request(Pending, NonAcademic, Reviewer::Admin, &Decision::Approve);
        assert_eq!(next, Ok(Approved));
    }

    #[test]
    fn academic_requests_need_the_dean() {
        let next = review_club_request(Pending, Academic, Reviewer::Admin, &Decision::Approve);
        assert_eq!(next, Ok(AdminApproved));
        let next = review_club_request(AdminApproved, Academic, Reviewer::Dean, &Decision::Approve);
        assert_eq!(next, Ok(Approved));
    }

    #[test]
    fn rejection_paths() {
        assert_eq!(
            review_club_request(Pending, NonAcademic, Reviewer::Admin, &reject("insufficient info")),
            Ok(Rejected)
        );
        assert_eq!(
            review_club_request(AdminApproved, Academic, Reviewer::Dean, &reject("no advisor")),
            Ok(Rejected)
        );
    }

    #[test]
    fn reviewers_act_in_order() {
        assert_eq!(
            review_club_request(Pending, Academic, Reviewer::Dean, &Decision::Approve),
            Err(TransitionError::NotYourTurn("the admin"))
        );
        assert_eq!(
            review_club_request(AdminApproved, Academic, Reviewer::Admin, &reject("late")),
            Err(TransitionError::NotYourTurn("the dean"))
        );
    }

    #[test]
    fn closed_requests_stay_closed() {
        for status in [Approved, Rejected] {
            for reviewer in [Reviewer::Admin, Reviewer::Dean] {
                assert_eq!(
                    review_club_request(status, Academic, reviewer, &Decision::Approve),
                    Err(TransitionError::RequestClosed(status))
                );
            }
        }
    }

    #[test]
    fn non_academic_events_are_approved_by_the_admin() {
        let before = EventReview::pending();
        let after = before.review(NonAcademic, Reviewer::Admin, &Decision::Approve).unwrap();
        assert!(after.approved_by_admin && after.approved_by_dean);
        assert_eq!(after.status, ReviewStatus::Approved);
        assert!(after.just_approved(&before));
    }

    #[test]
    fn academic_events_need_both_flags() {
        let before = EventReview::pending();
        let mid = before.review(Academic, Reviewer::Admin, &Decision::Approve).unwrap();
        assert_eq!(mid.status, ReviewStatus::Pending);
        assert!(mid.approved_by_admin && !mid.approved_by_dean);
        assert!(!mid.just_approved(&before));

        let done = mid.review(Academic, Reviewer::Dean, &Decision::Approve).unwrap();
        assert_eq!(done.status, ReviewStatus::Approved);
        assert!(done.just_approved(&mid));
    }

    #[test]
    fn deans_wait_for_admins_and_skip_non_academic_events() {
        let pending = EventReview::pending();
        assert_eq!(
            pending.review(Academic, Reviewer::Dean, &Decision::Approve),
            Err(TransitionError::NotYourTurn("the admin"))
        );
        assert_eq!(
            pending.review(NonAcademic, Reviewer::Dean, &Decision::Approve),
            Err(TransitionError::DeanNotRequired)
        );
    }

    #[test]
    fn event_rejection_is_terminal() {
        let mid = EventReview::pending()
            .review(Academic, Reviewer::Admin, &Decision::Approve)
            .unwrap();
        let rejected = mid.review(Academic, Reviewer::Dean, &reject("clashes with exams")).unwrap();
        assert_eq!(rejected.status, ReviewStatus::Rejected);
        assert_eq!(
            rejected.review(Academic, Reviewer::Dean, &Decision::Approve),
            Err(TransitionError::AlreadyReviewed)
        );
    }

    #[test]
    fn admins_cannot_review_twice() {
        let mid = EventReview::pending()
            .review(Academic, Reviewer::Admin, &Decision::Approve)
            .unwrap();
        assert_eq!(
            mid.review(Academic, Reviewer::Admin, &Decision::Approve),
            Err(TransitionError::NotYourTurn("the dean"))
        );
    }

    #[test]
    fn posts_are_reviewed_once() {
        assert_eq!(
            review_post(ReviewStatus::Pending, &Decision::Approve),
            Ok(ReviewStatus::Approved)
        );
        assert_eq!(
            review_post(ReviewStatus::Approved, &reject("spam")),
            Err(TransitionError::AlreadyReviewed)
        );
    }
}
